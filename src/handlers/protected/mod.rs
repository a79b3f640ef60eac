// handlers/protected/mod.rs - Endpoints behind the bearer token
//
// `jwt_auth_middleware` runs first and injects `AuthUser`. Each handler then
// resolves the caller's clinic and checks `resource:action` through
// `middleware::authorize` before touching any tenant data.

pub mod appointments;
pub mod attendance;
pub mod auth;
pub mod catalog;
pub mod clinic_users;
pub mod clinics;
pub mod devices;
pub mod invoices;
pub mod patients;
pub mod payments;
pub mod permissions;
pub mod sync;
pub mod templates;
pub mod whatsapp;
