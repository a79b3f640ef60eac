mod appointment;
mod attendance;
mod catalog;
mod clinic;
mod device;
mod invoice;
mod patient;
mod payment;
mod scheduled_message;
mod template;
mod user;

pub use appointment::{Appointment, AppointmentStatus};
pub use attendance::Attendance;
pub use catalog::{ReferringDoctor, TreatmentType};
pub use clinic::Clinic;
pub use device::UserDevice;
pub use invoice::{Invoice, InvoiceAction, InvoiceAuditLog, InvoiceLineItem, InvoiceStatus};
pub use patient::{Patient, Report};
pub use payment::Payment;
pub use scheduled_message::{ScheduledMessage, ScheduledStatus};
pub use template::MessageTemplate;
pub use user::{Role, User};
