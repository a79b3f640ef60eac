// handlers/public/mod.rs - Endpoints that need no access token
//
// Token acquisition only. Every request body is untrusted, so validation
// happens in the services before anything is written.

pub mod auth;
