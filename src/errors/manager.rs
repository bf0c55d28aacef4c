/// Manager-state errors (spec §7 item 5): rejected outright, never retried
/// blindly by the caller.
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum ManagerError {
    #[error("the subscription manager is closed")]
    Closed,
    #[error("cannot add subscription: the socket is being closed")]
    SocketClosing,
}
