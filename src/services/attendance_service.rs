use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::ServiceError;
use crate::database::models::{Attendance, Clinic};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two WGS84 points
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoCapture {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub address: Option<String>,
}

/// Calendar day at the clinic for an instant
pub fn attendance_day(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

pub struct AttendanceService {
    pool: PgPool,
    radius_meters: f64,
    offset: FixedOffset,
}

impl AttendanceService {
    pub fn new(pool: PgPool, radius_meters: f64, offset: FixedOffset) -> Self {
        Self {
            pool,
            radius_meters,
            offset,
        }
    }

    fn today_date(&self) -> NaiveDate {
        attendance_day(Utc::now(), self.offset)
    }

    /// Clinics without a recorded location do not enforce the geofence
    fn check_geofence(&self, clinic: &Clinic, at: &GeoCapture, action: &'static str) -> Result<(), ServiceError> {
        if !(-90.0..=90.0).contains(&at.latitude) || !(-180.0..=180.0).contains(&at.longitude) {
            return Err(ServiceError::validation("latitude", "Coordinates are out of range"));
        }
        if let Some((lat, lon)) = clinic.location() {
            let distance = haversine_meters(lat, lon, at.latitude, at.longitude);
            if distance > self.radius_meters {
                info!(clinic_id = %clinic.id, distance, "Attendance outside geofence");
                return Err(ServiceError::Geofence {
                    radius_meters: self.radius_meters,
                    action,
                });
            }
        }
        Ok(())
    }

    async fn clinic(&self, clinic_id: Uuid) -> Result<Clinic, ServiceError> {
        sqlx::query_as::<_, Clinic>("SELECT * FROM clinics WHERE id = $1")
            .bind(clinic_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Clinic".to_string()))
    }

    async fn today(&self, user_id: Uuid) -> Result<Option<Attendance>, ServiceError> {
        Ok(sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE user_id = $1 AND date = $2")
            .bind(user_id)
            .bind(self.today_date())
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn clock_in(&self, clinic_id: Uuid, user_id: Uuid, at: GeoCapture) -> Result<Attendance, ServiceError> {
        let clinic = self.clinic(clinic_id).await?;
        if self.today(user_id).await?.is_some() {
            return Err(ServiceError::AlreadyClockedIn);
        }
        self.check_geofence(&clinic, &at, "clock in")?;

        let record = sqlx::query_as::<_, Attendance>(
            "INSERT INTO attendance (clinic_id, user_id, date, check_in_time, status, \
             clock_in_latitude, clock_in_longitude, clock_in_accuracy, clock_in_address) \
             VALUES ($1, $2, $3, now(), 'present', $4, $5, $6, $7) RETURNING *",
        )
        .bind(clinic_id)
        .bind(user_id)
        .bind(self.today_date())
        .bind(at.latitude)
        .bind(at.longitude)
        .bind(at.accuracy)
        .bind(at.address.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ServiceError::AlreadyClockedIn,
            other => other.into(),
        })?;
        info!(clinic_id = %clinic_id, user_id = %user_id, "Clocked in");
        Ok(record)
    }

    pub async fn clock_out(&self, clinic_id: Uuid, user_id: Uuid, at: GeoCapture) -> Result<Attendance, ServiceError> {
        let clinic = self.clinic(clinic_id).await?;
        let open = match self.today(user_id).await? {
            Some(record) if record.check_in_time.is_some() && record.check_out_time.is_none() => record,
            _ => return Err(ServiceError::NotClockedIn),
        };
        self.check_geofence(&clinic, &at, "clock out")?;

        let record = sqlx::query_as::<_, Attendance>(
            "UPDATE attendance SET check_out_time = now(), \
             hours_worked = round((EXTRACT(EPOCH FROM (now() - check_in_time)) / 3600.0)::numeric, 2)::float8, \
             clock_out_latitude = $2, clock_out_longitude = $3, clock_out_accuracy = $4, clock_out_address = $5 \
             WHERE id = $1 AND check_out_time IS NULL RETURNING *",
        )
        .bind(open.id)
        .bind(at.latitude)
        .bind(at.longitude)
        .bind(at.accuracy)
        .bind(at.address.as_deref())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotClockedIn)?;
        info!(clinic_id = %clinic_id, user_id = %user_id, hours = ?record.hours_worked, "Clocked out");
        Ok(record)
    }

    pub async fn status(&self, user_id: Uuid) -> Result<Option<Attendance>, ServiceError> {
        self.today(user_id).await
    }

    pub async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<Attendance>, ServiceError> {
        Ok(sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE user_id = $1 ORDER BY date DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit.clamp(1, 366))
        .fetch_all(&self.pool)
        .await?)
    }

    /// Clinic-wide view for one day (today when omitted)
    pub async fn list(&self, clinic_id: Uuid, date: Option<NaiveDate>) -> Result<Vec<Attendance>, ServiceError> {
        Ok(sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE clinic_id = $1 AND date = $2 ORDER BY check_in_time, id",
        )
        .bind(clinic_id)
        .bind(date.unwrap_or_else(|| self.today_date()))
        .fetch_all(&self.pool)
        .await?)
    }
}
