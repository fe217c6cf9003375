//! WebSocket close codes used by the relay link.
//!
//! Only [`CloseCode::NORMAL`] is treated as a deliberate, clean shutdown.
//! Every other code sends the connection manager down its reconnection path.

use std::fmt;

/// A WebSocket close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Clean, intentional closure. Suppresses automatic reconnection.
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// Endpoint going away (process exit, page unload).
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Connection dropped without a close frame. Never sent on the wire.
    pub const ABNORMAL: CloseCode = CloseCode(1006);
    /// Local force-close after the liveness window expired.
    pub const HEARTBEAT_TIMEOUT: CloseCode = CloseCode(4000);
    /// Local force-close issued to restart the link immediately.
    pub const FORCE_RECONNECT: CloseCode = CloseCode(4001);
    /// Local force-close of a transport that never finished opening.
    pub const CONNECT_TIMEOUT: CloseCode = CloseCode(4002);

    /// Whether this code marks a clean close that must not trigger a reconnect.
    pub fn is_clean(self) -> bool {
        self == Self::NORMAL
    }

    /// The raw numeric code.
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
