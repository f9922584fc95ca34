/*!
 * Middleware Module
 *
 * Contains HTTP middleware for authentication and CORS.
 */

pub mod auth;
pub mod cors;
