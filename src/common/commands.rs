/// Commands a render surface sends down to its chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Post the text as the signed-in identity.
    Send(String),
    /// Drop the subscription and resume it from the cache watermark.
    Reconnect,
    /// Unsubscribe, sign the identity out and stop the session.
    SignOut,
    /// Unsubscribe and stop the session, keeping the identity.
    Quit,
}
