use assert_matches::assert_matches;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::{AppointmentBookingService, ConflictDetectionService};
use doctor_cell::models::{AvailabilityWindowInput, CreateDoctorRequest, CreateSpecialtyRequest, UpdateDoctorRequest};
use doctor_cell::services::availability::intervals_overlap;
use doctor_cell::services::{AvailabilityService, DoctorService, SpecialtyService};
use shared_utils::test_utils::TestContext;

// 2030-01-07 is a Monday
fn monday(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 7, h, m, 0).unwrap()
}

fn seed_doctor(ctx: &TestContext) -> Uuid {
    let doctor = DoctorService::new(&ctx.state)
        .create_doctor(CreateDoctorRequest {
            name: "Carmen Vidal".into(),
            email: None,
            bio: None,
            photo_url: None,
            timezone: Some("UTC".into()),
            external_calendar_url: None,
            calendar_push_url: None,
            specialty_ids: Vec::new(),
        })
        .unwrap();

    AvailabilityService::new(&ctx.state)
        .set_windows(
            doctor.id,
            vec![AvailabilityWindowInput {
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            }],
        )
        .unwrap();

    doctor.id
}

fn slot(doctor_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        patient_id: None,
        doctor_id,
        specialty_id: None,
        start_time: start,
        end_time: end,
        status: None,
        notes: None,
    }
}

#[test]
fn test_monday_morning_booking_example() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    let first = service
        .create_appointment(slot(doctor_id, monday(10, 0), monday(10, 30)))
        .unwrap();
    assert_eq!(first.status, AppointmentStatus::Pending);
    assert_eq!(first.source, AppointmentSource::Internal);

    let second = service.create_appointment(slot(doctor_id, monday(10, 15), monday(10, 45)));
    assert_matches!(second, Err(AppointmentError::ConflictError));

    let cancelled = service.cancel_appointment(first.id, Some("Patient called".into())).unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Patient called"));
    assert!(cancelled.cancelled_at.is_some());

    let second = service
        .create_appointment(slot(doctor_id, monday(10, 15), monday(10, 45)))
        .unwrap();
    assert_eq!(second.start_time, monday(10, 15));

    // The cancelled row is still there
    let fetched = service.get_appointment(first.id).unwrap();
    assert_eq!(fetched.status, AppointmentStatus::Cancelled);
}

#[test]
fn test_booking_outside_availability_fails() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    assert_matches!(
        service.create_appointment(slot(doctor_id, monday(11, 45), monday(12, 15))),
        Err(AppointmentError::OutsideAvailability)
    );
    assert_matches!(
        service.create_appointment(slot(doctor_id, monday(8, 0), monday(8, 30))),
        Err(AppointmentError::OutsideAvailability)
    );

    let tuesday = monday(10, 0) + Duration::days(1);
    assert_matches!(
        service.create_appointment(slot(doctor_id, tuesday, tuesday + Duration::minutes(30))),
        Err(AppointmentError::OutsideAvailability)
    );
}

#[test]
fn test_time_validation() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    assert_matches!(
        service.create_appointment(slot(doctor_id, monday(10, 30), monday(10, 0))),
        Err(AppointmentError::InvalidTime(_))
    );
    assert_matches!(
        service.create_appointment(slot(doctor_id, monday(10, 0), monday(10, 5))),
        Err(AppointmentError::ValidationError(_))
    );
    assert_matches!(
        service.create_appointment(slot(doctor_id, monday(9, 0), monday(13, 30))),
        Err(AppointmentError::ValidationError(_))
    );

    let past = Utc.with_ymd_and_hms(2020, 1, 6, 10, 0, 0).unwrap();
    assert_matches!(
        service.create_appointment(slot(doctor_id, past, past + Duration::minutes(30))),
        Err(AppointmentError::InvalidTime(_))
    );
}

#[test]
fn test_custom_duration_rules() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state).with_rules(AppointmentValidationRules {
        min_duration_minutes: 30,
        ..Default::default()
    });

    assert_matches!(
        service.create_appointment(slot(doctor_id, monday(10, 0), monday(10, 15))),
        Err(AppointmentError::ValidationError(_))
    );
    assert!(service.create_appointment(slot(doctor_id, monday(10, 0), monday(10, 30))).is_ok());
}

#[test]
fn test_unknown_or_inactive_doctor() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    assert_matches!(
        service.create_appointment(slot(Uuid::new_v4(), monday(10, 0), monday(10, 30))),
        Err(AppointmentError::DoctorNotFound)
    );

    DoctorService::new(&ctx.state)
        .update_doctor(doctor_id, UpdateDoctorRequest { is_active: Some(false), ..Default::default() })
        .unwrap();
    assert_matches!(
        service.create_appointment(slot(doctor_id, monday(10, 0), monday(10, 30))),
        Err(AppointmentError::DoctorNotFound)
    );
}

#[test]
fn test_specialty_must_be_offered_by_doctor() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let specialty = SpecialtyService::new(&ctx.state)
        .create_specialty(CreateSpecialtyRequest { name: "Dermatology".into(), description: None })
        .unwrap();
    let service = AppointmentBookingService::new(&ctx.state);

    let mut request = slot(doctor_id, monday(10, 0), monday(10, 30));
    request.specialty_id = Some(specialty.id);
    assert_matches!(service.create_appointment(request.clone()), Err(AppointmentError::ValidationError(_)));

    request.specialty_id = Some(Uuid::new_v4());
    assert_matches!(service.create_appointment(request.clone()), Err(AppointmentError::SpecialtyNotFound));

    DoctorService::new(&ctx.state)
        .update_doctor(doctor_id, UpdateDoctorRequest { specialty_ids: Some(vec![specialty.id]), ..Default::default() })
        .unwrap();
    request.specialty_id = Some(specialty.id);
    assert!(service.create_appointment(request).is_ok());
}

#[test]
fn test_unknown_patient_is_rejected() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    let mut request = slot(doctor_id, monday(10, 0), monday(10, 30));
    request.patient_id = Some(Uuid::new_v4());
    assert_matches!(service.create_appointment(request), Err(AppointmentError::PatientNotFound));
}

#[test]
fn test_public_booking_reuses_patient_by_email() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    let booking = |start: DateTime<Utc>, email: &str| BookAppointmentRequest {
        first_name: "Irene".into(),
        last_name: "Molina".into(),
        email: email.into(),
        phone: None,
        doctor_id,
        specialty_id: None,
        start_time: start,
        end_time: start + Duration::minutes(30),
        notes: Some("First visit".into()),
    };

    let first = service.book_appointment(booking(monday(9, 0), "irene@example.com")).unwrap();
    let second = service.book_appointment(booking(monday(9, 30), "IRENE@example.com")).unwrap();

    assert!(first.patient_id.is_some());
    assert_eq!(first.patient_id, second.patient_id);
    assert_eq!(first.status, AppointmentStatus::Pending);

    // A rejected booking leaves no patient behind
    let rejected = service.book_appointment(booking(monday(9, 15), "other@example.com"));
    assert_matches!(rejected, Err(AppointmentError::ConflictError));
    let count: i64 = ctx
        .state
        .db
        .with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
                .map_err(shared_database::DatabaseError::from)
        })
        .unwrap();
    assert_eq!(count, 1);

    // Invalid contact details are a validation failure
    assert_matches!(
        service.book_appointment(booking(monday(11, 0), "nope")),
        Err(AppointmentError::ValidationError(_))
    );
}

#[test]
fn test_reschedule_and_status_transitions() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    let first = service.create_appointment(slot(doctor_id, monday(9, 0), monday(9, 30))).unwrap();
    let second = service.create_appointment(slot(doctor_id, monday(10, 0), monday(10, 30))).unwrap();

    // Moving onto another booking conflicts
    let clash = service.update_appointment(
        first.id,
        UpdateAppointmentRequest {
            start_time: Some(monday(10, 15)),
            end_time: Some(monday(10, 45)),
            ..Default::default()
        },
    );
    assert_matches!(clash, Err(AppointmentError::ConflictError));

    // Overlapping its own previous interval is fine
    let moved = service
        .update_appointment(
            first.id,
            UpdateAppointmentRequest {
                start_time: Some(monday(9, 15)),
                end_time: Some(monday(9, 45)),
                status: Some(AppointmentStatus::Confirmed),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(moved.start_time, monday(9, 15));
    assert_eq!(moved.status, AppointmentStatus::Confirmed);

    let back = service.update_appointment(
        first.id,
        UpdateAppointmentRequest { status: Some(AppointmentStatus::Pending), ..Default::default() },
    );
    assert_matches!(back, Err(AppointmentError::InvalidStatusTransition { .. }));

    let completed = service
        .update_appointment(
            second.id,
            UpdateAppointmentRequest { status: Some(AppointmentStatus::Completed), ..Default::default() },
        )
        .unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);

    let frozen = service.update_appointment(
        second.id,
        UpdateAppointmentRequest { start_time: Some(monday(11, 0)), end_time: Some(monday(11, 30)), ..Default::default() },
    );
    assert_matches!(frozen, Err(AppointmentError::CannotModify(AppointmentStatus::Completed)));

    // Notes stay editable on closed appointments
    let noted = service
        .update_appointment(second.id, UpdateAppointmentRequest { notes: Some("Follow-up in 3 months".into()), ..Default::default() })
        .unwrap();
    assert_eq!(noted.notes.as_deref(), Some("Follow-up in 3 months"));

    assert_matches!(
        service.cancel_appointment(second.id, None),
        Err(AppointmentError::InvalidStatusTransition { .. })
    );
}

#[test]
fn test_cancel_is_idempotent() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);
    let appointment = service.create_appointment(slot(doctor_id, monday(9, 0), monday(9, 30))).unwrap();

    let once = service.cancel_appointment(appointment.id, Some("Sick".into())).unwrap();
    let twice = service.cancel_appointment(appointment.id, Some("Other".into())).unwrap();

    assert_eq!(once.cancelled_at, twice.cancelled_at);
    assert_eq!(twice.cancellation_reason.as_deref(), Some("Sick"));
    assert_matches!(service.cancel_appointment(Uuid::new_v4(), None), Err(AppointmentError::NotFound));
}

#[test]
fn test_list_filters() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    let a = service.create_appointment(slot(doctor_id, monday(9, 0), monday(9, 30))).unwrap();
    let b = service.create_appointment(slot(doctor_id, monday(10, 0), monday(10, 30))).unwrap();
    let c = service.create_appointment(slot(doctor_id, monday(11, 0), monday(11, 30))).unwrap();
    service.cancel_appointment(c.id, None).unwrap();

    let all = service.list_appointments(AppointmentSearchQuery::default()).unwrap();
    assert_eq!(all.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id, b.id, c.id]);

    let window = service
        .list_appointments(AppointmentSearchQuery {
            from: Some(monday(9, 15)),
            to: Some(monday(10, 0)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(window.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id]);

    let cancelled = service
        .list_appointments(AppointmentSearchQuery { status: Some(AppointmentStatus::Cancelled), ..Default::default() })
        .unwrap();
    assert_eq!(cancelled.len(), 1);

    let paged = service
        .list_appointments(AppointmentSearchQuery { limit: Some(1), offset: Some(1), ..Default::default() })
        .unwrap();
    assert_eq!(paged[0].id, b.id);

    let other_doctor = service
        .list_appointments(AppointmentSearchQuery { doctor_id: Some(Uuid::new_v4()), ..Default::default() })
        .unwrap();
    assert!(other_doctor.is_empty());
}

#[test]
fn test_conflict_check_reports_without_booking() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);
    let existing = service.create_appointment(slot(doctor_id, monday(10, 0), monday(10, 30))).unwrap();

    let conflicts = ConflictDetectionService::new(&ctx.state);
    let response = conflicts
        .check_conflicts(ConflictCheckRequest {
            doctor_id,
            start_time: monday(10, 15),
            end_time: monday(10, 45),
            exclude_appointment_id: None,
        })
        .unwrap();
    assert!(response.has_conflict);
    assert_eq!(response.conflicting_appointments[0].id, existing.id);

    let excluded = conflicts
        .check_conflicts(ConflictCheckRequest {
            doctor_id,
            start_time: monday(10, 15),
            end_time: monday(10, 45),
            exclude_appointment_id: Some(existing.id),
        })
        .unwrap();
    assert!(!excluded.has_conflict);
}

#[test]
fn test_no_overlapping_active_appointments_after_many_bookings() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);
    let service = AppointmentBookingService::new(&ctx.state);

    // Every 5 minutes try a 20-40 minute booking across the window
    for i in 0..36u32 {
        let start = monday(9, 0) + Duration::minutes(i64::from(i) * 5);
        let length = 20 + (i % 3) * 10;
        let _ = service.create_appointment(slot(doctor_id, start, start + Duration::minutes(i64::from(length))));
        if i % 7 == 0 {
            if let Some(last) = service
                .list_appointments(AppointmentSearchQuery { doctor_id: Some(doctor_id), ..Default::default() })
                .unwrap()
                .into_iter()
                .find(|a| a.is_active())
            {
                service.cancel_appointment(last.id, None).unwrap();
            }
        }
    }

    let active: Vec<Appointment> = service
        .list_appointments(AppointmentSearchQuery { doctor_id: Some(doctor_id), ..Default::default() })
        .unwrap()
        .into_iter()
        .filter(|a| a.is_active())
        .collect();
    assert!(!active.is_empty());

    for (i, a) in active.iter().enumerate() {
        for b in active.iter().skip(i + 1) {
            assert!(
                !intervals_overlap(a.start_time, a.end_time, b.start_time, b.end_time),
                "{} overlaps {}",
                a.id,
                b.id
            );
        }
    }
}

#[test]
fn test_concurrent_bookings_of_same_slot() {
    let ctx = TestContext::new();
    let doctor_id = seed_doctor(&ctx);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state = ctx.state();
            std::thread::spawn(move || {
                AppointmentBookingService::new(&state).create_appointment(slot(doctor_id, monday(10, 0), monday(10, 30)))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let booked = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(AppointmentError::ConflictError)))
        .count();

    assert_eq!(booked, 1);
    assert_eq!(conflicts, 7);
}
