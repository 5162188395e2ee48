// libs/shared/models/src/appointment.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// APPOINTMENT DATA CONTRACT
// ==============================================================================

/// One scheduled consultation between a patient and a doctor.
///
/// This is a read-only contract for the call core: the record is owned by the
/// scheduling backend and never mutated here. `appointment_time` is local
/// wall-clock (hour:minute) on `appointment_date`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub appointment_date: NaiveDate,
    #[serde(with = "wall_clock_time")]
    pub appointment_time: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Combine the appointment's date and wall-clock time into the scheduled
    /// start instant. Plain date-time arithmetic, so windows that cross
    /// midnight behave correctly.
    pub fn scheduled_start(&self) -> NaiveDateTime {
        self.appointment_date.and_time(self.appointment_time)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
        }
    }
}

/// Domain role of the signed-in user, as exposed by the auth layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Patient,
    Doctor,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Patient => write!(f, "patient"),
            UserRole::Doctor => write!(f, "doctor"),
        }
    }
}

// Scheduling stores times as "HH:MM" wall-clock strings; accept a trailing
// seconds component on input for records written by older backends.
mod wall_clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("Invalid time '{}': {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_appointment() -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            status: AppointmentStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            appointment_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            appointment_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_scheduled_start_combines_date_and_time() {
        let appointment = sample_appointment();
        let start = appointment.scheduled_start();
        assert_eq!(start.format("%Y-%m-%d %H:%M").to_string(), "2026-03-14 14:00");
    }

    #[test]
    fn test_time_serializes_as_wall_clock() {
        let appointment = sample_appointment();
        let value = serde_json::to_value(&appointment).unwrap();
        assert_eq!(value["appointment_time"], json!("14:00"));
        assert_eq!(value["status"], json!("confirmed"));
        assert_eq!(value["payment_status"], json!("paid"));
    }

    #[test]
    fn test_time_deserializes_with_and_without_seconds() {
        let mut value = serde_json::to_value(sample_appointment()).unwrap();
        value["appointment_time"] = json!("09:30");
        let appointment: Appointment = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(appointment.appointment_time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());

        value["appointment_time"] = json!("09:30:00");
        let appointment: Appointment = serde_json::from_value(value).unwrap();
        assert_eq!(appointment.appointment_time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }
}
