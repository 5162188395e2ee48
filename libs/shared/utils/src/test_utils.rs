// libs/shared/utils/src/test_utils.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{Appointment, AppointmentStatus, PaymentStatus};

pub struct TestConfig {
    pub stun_servers: Vec<String>,
    pub signaling_channel_prefix: String,
    pub negotiation_timeout_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.test.invalid:19302".to_string()],
            signaling_channel_prefix: "video-call-".to_string(),
            negotiation_timeout_secs: 30,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            stun_servers: self.stun_servers.clone(),
            signaling_channel_prefix: self.signaling_channel_prefix.clone(),
            negotiation_timeout_secs: self.negotiation_timeout_secs,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Appointment fixture builder. Defaults to a confirmed, paid consultation
/// on 2026-03-14 at 14:00.
pub struct TestAppointment {
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl Default for TestAppointment {
    fn default() -> Self {
        Self {
            status: AppointmentStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            date: NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid fixture date"),
            time: NaiveTime::from_hms_opt(14, 0, 0).expect("valid fixture time"),
        }
    }
}

impl TestAppointment {
    pub fn confirmed() -> Self {
        Self::default()
    }

    pub fn with_status(status: AppointmentStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn unpaid() -> Self {
        Self {
            payment_status: PaymentStatus::Pending,
            ..Self::default()
        }
    }

    pub fn at(mut self, date: &str, time: &str) -> Self {
        self.date = NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid test date");
        self.time = NaiveTime::parse_from_str(time, "%H:%M").expect("valid test time");
        self
    }

    pub fn to_appointment(&self) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            status: self.status,
            payment_status: self.payment_status,
            appointment_date: self.date,
            appointment_time: self.time,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
