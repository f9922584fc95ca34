/*!
 * LIFF Token & URL Helpers
 *
 * Clinics are identified in patient-facing LIFF URLs by an opaque
 * URL-safe token instead of their database id, so clinic ids cannot be
 * enumerated from links. Tokens are unique across all clinics.
 */

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Generate a URL-safe clinic access token (32 random bytes, ~43 chars)
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build a LIFF URL for a clinic token and mode, e.g.
/// `{frontend}/liff/book?token={token}`
pub fn build_liff_url(frontend_url: &str, mode: &str, token: &str) -> String {
    format!("{}/liff/{}?token={}", frontend_url.trim_end_matches('/'), mode, token)
}

/// Build the reschedule URL, which additionally carries the appointment id
pub fn build_reschedule_url(frontend_url: &str, token: &str, appointment_id: i64) -> String {
    format!(
        "{}/liff/reschedule?token={}&appointmentId={}",
        frontend_url.trim_end_matches('/'),
        token,
        appointment_id
    )
}
