//! Device pairing codes
//!
//! A device without a keyboard asks for a short code, shows it (and a QR
//! code of the approval link) and polls its status. A signed-in user
//! approves or denies the code from another device. The session the code
//! will deliver is created up front but stays inert until approval hands
//! the token to the polling device; denial or expiry deletes it.

use crate::{Error, Result, config::settings::AuthSettings, store::Store};
use parking_lot::Mutex;
use qrcode::QrCode;
use qrcode::render::svg;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// No I, O, 0 or 1: codes are read off a TV screen
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug)]
struct PairingRequest {
    expires_at: Instant,
    requester_ip: String,
    decision: Decision,
    session_token: String,
}

/// Freshly issued code
#[derive(Debug, Clone, PartialEq)]
pub struct PairingTicket {
    pub code: String,
    pub expires_in: u64,
}

/// What a polling device learns about its code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PairStatus {
    Pending {
        /// Only shown to signed-in viewers
        #[serde(skip_serializing_if = "Option::is_none")]
        requester_ip: Option<String>,
    },
    /// Delivered once; the caller sets the session cookie
    Approved {
        #[serde(skip)]
        token: String,
    },
    Denied,
    Expired,
}

/// Pairing codes and per-IP request windows
#[derive(Debug)]
pub struct PairingRegistry {
    ttl: Duration,
    rate_limit: usize,
    rate_window: Duration,
    requests: Mutex<HashMap<String, PairingRequest>>,
    rate: Mutex<HashMap<String, Vec<Instant>>>,
}

impl PairingRegistry {
    pub fn new(ttl: Duration, rate_limit: usize, rate_window: Duration) -> Self {
        Self {
            ttl,
            rate_limit,
            rate_window,
            requests: Mutex::new(HashMap::new()),
            rate: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(auth: &AuthSettings) -> Self {
        Self::new(
            Duration::from_secs(auth.pairing_ttl_secs),
            auth.pairing_rate_limit,
            Duration::from_secs(auth.pairing_rate_window_secs),
        )
    }

    fn check_rate(&self, ip: &str, now: Instant) -> Result<()> {
        let mut rate = self.rate.lock();
        let stamps = rate.entry(ip.to_string()).or_default();
        stamps.retain(|t| now.duration_since(*t) < self.rate_window);
        if stamps.len() >= self.rate_limit {
            return Err(Error::RateLimit {
                message: "Too many pairing requests. Try again later.".to_string(),
                retry_after: Some(self.rate_window.as_secs()),
            });
        }
        stamps.push(now);
        Ok(())
    }

    fn generate_code(requests: &HashMap<String, PairingRequest>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
                .collect();
            if !requests.contains_key(&code) {
                return code;
            }
        }
    }

    /// Issue a code for `ip`, creating the inert session it will deliver
    pub fn request(&self, store: &dyn Store, ip: &str) -> Result<PairingTicket> {
        let now = Instant::now();
        self.check_rate(ip, now)?;

        let session = store.create_session();
        let mut requests = self.requests.lock();
        let code = Self::generate_code(&requests);
        requests.insert(
            code.clone(),
            PairingRequest {
                expires_at: now + self.ttl,
                requester_ip: ip.to_string(),
                decision: Decision::Pending,
                session_token: session.token,
            },
        );
        info!("Pairing code issued for {}", ip);
        Ok(PairingTicket {
            code,
            expires_in: self.ttl.as_secs(),
        })
    }

    /// Poll a code; approved and denied codes are consumed by this call
    pub fn status(&self, store: &dyn Store, code: &str, show_requester: bool) -> PairStatus {
        let code = code.to_uppercase();
        let mut requests = self.requests.lock();
        let Some(request) = requests.get(&code) else {
            return PairStatus::Expired;
        };

        if request.expires_at <= Instant::now() {
            if let Some(request) = requests.remove(&code) {
                drop(requests);
                if request.decision != Decision::Approved {
                    store.delete_session(&request.session_token);
                }
            }
            return PairStatus::Expired;
        }

        let requester_ip = show_requester.then(|| request.requester_ip.clone());
        let decision = request.decision;
        match decision {
            Decision::Pending => PairStatus::Pending { requester_ip },
            Decision::Approved => match requests.remove(&code) {
                Some(request) => PairStatus::Approved {
                    token: request.session_token,
                },
                None => PairStatus::Expired,
            },
            Decision::Denied => {
                requests.remove(&code);
                PairStatus::Denied
            }
        }
    }

    fn decide(&self, code: &str, decision: Decision) -> Result<PairingRequestView> {
        let code = code.to_uppercase();
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(&code)
            .filter(|r| r.expires_at > Instant::now())
            .ok_or_else(|| Error::not_found("Code expired or invalid"))?;
        if request.decision != Decision::Pending {
            return Err(Error::validation("code", "Code already used"));
        }
        request.decision = decision;
        Ok(PairingRequestView {
            requester_ip: request.requester_ip.clone(),
            session_token: request.session_token.clone(),
        })
    }

    pub fn approve(&self, code: &str) -> Result<()> {
        let view = self.decide(code, Decision::Approved)?;
        info!("Pairing approved (requester IP: {})", view.requester_ip);
        Ok(())
    }

    /// Deny a code and delete the session it would have delivered
    pub fn deny(&self, store: &dyn Store, code: &str) -> Result<()> {
        let view = self.decide(code, Decision::Denied)?;
        store.delete_session(&view.session_token);
        info!("Pairing denied (requester IP: {})", view.requester_ip);
        Ok(())
    }

    /// Expire stale codes and empty rate windows
    pub fn sweep(&self, store: &dyn Store) -> usize {
        let now = Instant::now();
        let expired: Vec<PairingRequest> = {
            let mut requests = self.requests.lock();
            let codes: Vec<String> = requests
                .iter()
                .filter(|(_, r)| r.expires_at <= now)
                .map(|(c, _)| c.clone())
                .collect();
            codes.iter().filter_map(|c| requests.remove(c)).collect()
        };
        for request in &expired {
            if request.decision != Decision::Approved {
                store.delete_session(&request.session_token);
            }
        }

        self.rate.lock().retain(|_, stamps| {
            stamps.retain(|t| now.duration_since(*t) < self.rate_window);
            !stamps.is_empty()
        });

        if !expired.is_empty() {
            info!("Cleaned {} expired pairing requests", expired.len());
        }
        expired.len()
    }

    pub fn pending_count(&self) -> usize {
        self.requests.lock().len()
    }
}

struct PairingRequestView {
    requester_ip: String,
    session_token: String,
}

/// SVG QR code for the approval link
pub fn qr_svg(data: &str) -> Result<String> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| Error::internal(format!("QR encoding failed: {}", e)))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .quiet_zone(true)
        .build())
}
