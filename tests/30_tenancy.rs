mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use common::{onboard_owner, patient};

// Clinic site used by the attendance scenarios
const SITE: (f64, f64) = (12.9716, 77.5946);

#[tokio::test]
async fn patients_stay_inside_their_clinic() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let north = onboard_owner("north", None).await?;
    let south = onboard_owner("south", None).await?;

    let (status, body) = north.post("/patients", patient("Asha", "1234567890", "General")).await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let id = body["data"]["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(body["data"]["clinic_id"], json!(north.clinic_id));

    let (status, body) = south.get(&format!("/patients/{}", id)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    common::assert_error_envelope(&body);

    let (status, body) = south.get("/patients").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.to_string().contains(&id), "listing leaked another clinic's patient");

    // Phone numbers are unique per clinic, not globally
    let (status, body) = south.post("/patients", patient("Asha", "1234567890", "General")).await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, _) = north.post("/patients", patient("Asha Again", "1234567890", "General")).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn patients_with_payments_cannot_be_deleted() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let owner = onboard_owner("ledger", None).await?;

    let (_, body) = owner.post("/patients", patient("Ravi", "9876543210", "General")).await?;
    let paid = body["data"]["id"].as_str().unwrap_or_default().to_string();
    let (status, body) = owner
        .post("/payments", json!({ "patient_id": paid, "amount": 500, "payment_method": "Cash" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, body) = owner.delete(&format!("/patients/{}", paid)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    common::assert_error_envelope(&body);

    let (_, body) = owner.post("/patients", patient("Meena", "9876500000", "General")).await?;
    let plain = body["data"]["id"].as_str().unwrap_or_default().to_string();
    let (status, _) = owner.delete(&format!("/patients/{}", plain)).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = owner.get(&format!("/patients/{}", plain)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn clinics_with_an_active_owner_cannot_be_deleted() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let owner = onboard_owner("keeper", None).await?;
    let other = onboard_owner("stranger", None).await?;

    let (status, body) = owner.delete(&format!("/clinics/{}", owner.clinic_id)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    common::assert_error_envelope(&body);

    let (status, _) = owner.delete(&format!("/clinics/{}", other.clinic_id)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn visit_numbers_grow_per_patient() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let owner = onboard_owner("visits", None).await?;
    let (_, body) = owner.post("/patients", patient("Kiran", "9000000001", "General")).await?;
    let patient_id = body["data"]["id"].as_str().unwrap_or_default().to_string();

    let mut seen = Vec::new();
    for (day, supplied) in [("2026-03-02", None), ("2026-03-09", Some(41))] {
        let mut appointment = json!({
            "patient_id": patient_id,
            "appointment_date": day,
            "start_time": "10:00",
            "end_time": "10:30",
        });
        if let Some(n) = supplied {
            appointment["visit_number"] = json!(n);
        }
        let (status, body) = owner.post("/appointments", appointment).await?;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        seen.push(body["data"]["visit_number"].as_i64());
    }
    assert_eq!(seen, vec![Some(1), Some(2)]);
    Ok(())
}

#[tokio::test]
async fn clock_in_checks_the_geofence_and_repeats() -> Result<()> {
    if !common::live_database() {
        return Ok(());
    }
    let owner = onboard_owner("shift", Some(SITE)).await?;

    // Roughly 1.1 km north of the site
    let (status, body) = owner
        .post("/attendance/clock-in", json!({ "latitude": SITE.0 + 0.01, "longitude": SITE.1 }))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);
    assert_eq!(body["code"], "GEOFENCE_VIOLATION");

    let (status, body) = owner
        .post("/attendance/clock-in", json!({ "latitude": SITE.0, "longitude": SITE.1, "accuracy": 5.0 }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, body) = owner
        .post("/attendance/clock-in", json!({ "latitude": SITE.0, "longitude": SITE.1 }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_CLOCKED_IN");
    Ok(())
}
