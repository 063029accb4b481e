//! Password login, lockout, session cookies and device pairing

pub mod lockout;
pub mod pairing;
pub mod sessions;

pub use lockout::{LockoutPolicy, LoginGuard, format_remaining};
pub use pairing::{PairStatus, PairingRegistry, PairingTicket, qr_svg};
pub use sessions::{
    IpBuffer, clear_cookie, client_ip, read_cookie, safe_redirect, session_cookie,
};
