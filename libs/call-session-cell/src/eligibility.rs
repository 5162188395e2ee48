// libs/call-session-cell/src/eligibility.rs
use chrono::{Duration, NaiveDateTime};

use shared_models::{Appointment, AppointmentStatus, PaymentStatus, UserRole};

/// Joining opens this many minutes before the scheduled start.
pub const CALL_WINDOW_OPENS_EARLY_MINUTES: i64 = 10;

/// Joining stays open this many minutes after the scheduled start.
pub const CALL_WINDOW_CLOSES_LATE_MINUTES: i64 = 60;

/// The time range, relative to an appointment's scheduled start, during which
/// starting a call is permitted. Derived, never stored. Both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWindow {
    pub opens_at: NaiveDateTime,
    pub closes_at: NaiveDateTime,
}

impl CallWindow {
    pub fn for_appointment(appointment: &Appointment) -> Self {
        let start = appointment.scheduled_start();
        Self {
            opens_at: start - Duration::minutes(CALL_WINDOW_OPENS_EARLY_MINUTES),
            closes_at: start + Duration::minutes(CALL_WINDOW_CLOSES_LATE_MINUTES),
        }
    }

    pub fn contains(&self, now: NaiveDateTime) -> bool {
        now >= self.opens_at && now <= self.closes_at
    }
}

/// Whether `role` may start a video call for `appointment` at `now`.
///
/// Pure and deterministic: dashboards re-evaluate this once per second to
/// drive countdowns, so it must never touch a clock or block. Doctors are not
/// gated on payment; patients must have paid. That asymmetry is intentional.
pub fn is_call_eligible(appointment: &Appointment, role: UserRole, now: NaiveDateTime) -> bool {
    if appointment.status != AppointmentStatus::Confirmed {
        return false;
    }

    if role == UserRole::Patient && appointment.payment_status != PaymentStatus::Paid {
        return false;
    }

    CallWindow::for_appointment(appointment).contains(now)
}

/// Time remaining until the call window opens, for the dashboard's
/// "Call Available In" countdown. `None` once the window has opened or when
/// the appointment is not confirmed (nothing to count down to).
pub fn time_until_open(appointment: &Appointment, now: NaiveDateTime) -> Option<Duration> {
    if appointment.status != AppointmentStatus::Confirmed {
        return None;
    }

    let window = CallWindow::for_appointment(appointment);
    if now < window.opens_at {
        Some(window.opens_at - now)
    } else {
        None
    }
}
