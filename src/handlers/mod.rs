// handlers/mod.rs - Two security tiers
//
// Public (no token, /auth/register|login|oauth|refresh-token) and
// Protected (bearer token, everything else). Routing lives in `app`.

pub mod public;
pub mod protected;
