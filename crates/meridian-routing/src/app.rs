//! Application upcalls.

use meridian_id::Id;

use crate::envelope::RouteEnvelope;
use crate::handle::NodeHandle;

/// An application layered on a node.
///
/// Upcalls run inside the node's event loop and must not block.
pub trait Application: Send {
    /// The local node is the terminus for `key`. Fired once per envelope.
    fn deliver(&mut self, key: &Id, payload: &[u8]);

    /// The envelope is about to move on to `next_hop`, which is the local
    /// node when this is the terminal hop.
    ///
    /// Return `false` to stop routing it. The envelope's auxiliary
    /// application is asked if it has one, otherwise its destination.
    fn forward(&mut self, _envelope: &RouteEnvelope, _next_hop: &NodeHandle) -> bool {
        true
    }

    /// A node joined (`joined == true`) or left the local leaf set.
    fn update(&mut self, _handle: &NodeHandle, _joined: bool) {}
}
