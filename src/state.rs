// state.rs - Shared application state handed to every handler via `State<AppState>`
use std::sync::Arc;

use crate::auth::{AuthService, IdentityVerifier, TokenService};
use crate::authz::PolicyManager;
use crate::config::AppConfig;
use crate::database::DatabaseManager;
use crate::devices::DeviceRegistry;
use crate::services::{
    AppointmentService, AttendanceService, CatalogService, ClinicService, ClinicUserService, InvoiceService,
    PatientService, PaymentService, ScheduleService, TemplateService,
};
use crate::sync::SyncEngine;
use crate::whatsapp::WhatsAppClient;

/// Tenant services built once per process over the local pool
pub struct Services {
    pub clinics: ClinicService,
    pub clinic_users: ClinicUserService,
    pub patients: PatientService,
    pub appointments: AppointmentService,
    pub invoices: InvoiceService,
    pub payments: PaymentService,
    pub catalog: CatalogService,
    pub attendance: AttendanceService,
    pub templates: TemplateService,
    pub schedules: ScheduleService,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseManager,
    pub policy: Arc<PolicyManager>,
    pub auth: Arc<AuthService>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub devices: DeviceRegistry,
    pub whatsapp: Arc<dyn WhatsAppClient>,
    /// Absent when no cloud database is configured
    pub sync: Option<Arc<SyncEngine>>,
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        db: DatabaseManager,
        policy: Arc<PolicyManager>,
        tokens: Arc<TokenService>,
        verifier: Arc<dyn IdentityVerifier>,
        whatsapp: Arc<dyn WhatsAppClient>,
        sync: Option<Arc<SyncEngine>>,
    ) -> Self {
        let pool = db.local().clone();
        let min_password = config.security.min_password_length;

        let services = Services {
            clinics: ClinicService::new(pool.clone(), policy.clone()),
            clinic_users: ClinicUserService::new(pool.clone(), policy.clone(), min_password),
            patients: PatientService::new(pool.clone()),
            appointments: AppointmentService::new(pool.clone()),
            invoices: InvoiceService::new(pool.clone()),
            payments: PaymentService::new(pool.clone()),
            catalog: CatalogService::new(pool.clone()),
            attendance: AttendanceService::new(
                pool.clone(),
                config.attendance.geofence_radius_meters,
                config.attendance.utc_offset(),
            ),
            templates: TemplateService::new(pool.clone()),
            schedules: ScheduleService::new(pool.clone()),
        };

        Self {
            auth: Arc::new(AuthService::new(pool.clone(), tokens, min_password)),
            devices: DeviceRegistry::new(pool),
            db,
            policy,
            verifier,
            whatsapp,
            sync,
            services: Arc::new(services),
        }
    }
}
