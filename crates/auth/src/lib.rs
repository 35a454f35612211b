//! Short-lived credentials for dashboard access.
//!
//! This crate provides:
//! - `AccessTokenIssuer`: single-use bearer tokens with a bounded live pool
//! - `EmailOtpVerifier`: six-digit codes delivered by mail, bound to a session
//! - `LockoutTracker`: failure counting shared by both, keyed by IP or session
//! - `spawn_sweeper`: background reclamation of expired state

pub mod access_token;
pub mod clock;
pub mod email_otp;
pub mod error;
pub mod lockout;
pub mod mail;
pub mod sweep;

pub use {
    access_token::{AccessTokenIssuer, AccessTokenPolicy, IssuedToken},
    clock::{Clock, ManualClock, SystemClock},
    email_otp::{CODE_LENGTH, EmailOtpVerifier, MAX_ATTEMPTS, OtpPolicy},
    error::{Rejection, Verdict},
    lockout::{LockoutPolicy, LockoutTracker},
    mail::{MailTransport, OutgoingMail, SmtpMailTransport, mask_address},
    sweep::spawn_sweeper,
};
