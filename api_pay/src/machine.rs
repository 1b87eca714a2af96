use common::error::{AppError, Res};
use db::{dtos::job::PaymentTransition, models::job::Job};
use notifier::mail::PaymentLeg;

/// Largest accepted difference between the quoted and the submitted total.
pub const AMOUNT_EPSILON: f64 = 0.01;

/// Price per page for each writer level.
pub fn rate_per_page(writer_level: &str) -> Option<f64> {
    match writer_level.trim().to_lowercase().as_str() {
        "highschool" => Some(6.0),
        "college" => Some(9.0),
        "bachelors" => Some(12.0),
        "masters" => Some(15.0),
        "phd" => Some(18.0),
        _ => None,
    }
}

pub fn quote(pages: i32, writer_level: &str) -> Res<f64> {
    if pages <= 0 {
        return Err(AppError::Validation("pages must be positive".to_string()));
    }
    let rate = rate_per_page(writer_level).ok_or_else(|| {
        AppError::Validation(format!("Unknown writer level: {}", writer_level))
    })?;
    Ok(pages as f64 * rate)
}

/// Checks the submitted total against the quote. Mismatches are rejected,
/// never corrected.
pub fn verify_total(pages: i32, writer_level: &str, provided: f64) -> Res<f64> {
    let expected = quote(pages, writer_level)?;
    if !provided.is_finite() || (expected - provided).abs() > AMOUNT_EPSILON {
        return Err(AppError::InvalidAmount { expected, provided });
    }
    Ok(expected)
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Upfront share of `total`, in cents precision.
pub fn upfront_amount(total: f64, ratio: f64) -> f64 {
    round_cents(total * ratio)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPhase {
    Upfront,
    Completion,
}

impl PaymentPhase {
    pub fn transition(&self) -> PaymentTransition {
        match self {
            PaymentPhase::Upfront => PaymentTransition::UpfrontSettled,
            PaymentPhase::Completion => PaymentTransition::CompletionSettled,
        }
    }

    pub fn leg(&self) -> PaymentLeg {
        match self {
            PaymentPhase::Upfront => PaymentLeg::Upfront,
            PaymentPhase::Completion => PaymentLeg::Completion,
        }
    }

    /// Amount charged in this phase.
    pub fn amount(&self, job: &Job) -> f64 {
        match self {
            PaymentPhase::Upfront => job.upfront_amount,
            PaymentPhase::Completion => job.remaining_amount(),
        }
    }

    /// Phase of `tracking_id` on `job`, if the job issued it.
    pub fn of(job: &Job, tracking_id: &str) -> Option<PaymentPhase> {
        if job.upfront_tracking_id.as_deref() == Some(tracking_id) {
            Some(PaymentPhase::Upfront)
        } else if job.completion_tracking_id.as_deref() == Some(tracking_id) {
            Some(PaymentPhase::Completion)
        } else {
            None
        }
    }
}

pub fn merchant_reference(job_id: i64, phase: PaymentPhase, timestamp: i64) -> String {
    match phase {
        PaymentPhase::Upfront => format!("JOB-{}-{}", job_id, timestamp),
        PaymentPhase::Completion => format!("JOB-{}-COMPLETE-{}", job_id, timestamp),
    }
}

/// Job id and phase encoded in a merchant reference, `None` when malformed.
pub fn parse_reference(reference: &str) -> Option<(i64, PaymentPhase)> {
    let mut parts = reference.trim().split('-');
    if parts.next()? != "JOB" {
        return None;
    }
    let job_id = parts.next()?.parse::<i64>().ok()?;
    let phase = match (parts.next()?, parts.next(), parts.next()) {
        ("COMPLETE", Some(ts), None) if ts.parse::<i64>().is_ok() => PaymentPhase::Completion,
        (ts, None, None) if ts.parse::<i64>().is_ok() => PaymentPhase::Upfront,
        _ => return None,
    };
    Some((job_id, phase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_table() {
        assert_eq!(quote(5, "masters").unwrap(), 75.0);
        assert_eq!(quote(3, "PhD").unwrap(), 54.0);
        assert_eq!(quote(1, "highschool").unwrap(), 6.0);
        assert!(matches!(quote(2, "postdoc"), Err(AppError::Validation(_))));
        assert!(matches!(quote(0, "college"), Err(AppError::Validation(_))));
    }

    #[test]
    fn tampered_totals_are_rejected() {
        assert_eq!(verify_total(5, "masters", 75.0).unwrap(), 75.0);
        assert!(verify_total(5, "masters", 75.005).is_ok());

        match verify_total(5, "masters", 80.0) {
            Err(AppError::InvalidAmount { expected, provided }) => {
                assert_eq!(expected, 75.0);
                assert_eq!(provided, 80.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(verify_total(5, "masters", 75.02).is_err());
        assert!(verify_total(5, "masters", f64::NAN).is_err());
    }

    #[test]
    fn upfront_split_rounds_to_cents() {
        assert_eq!(upfront_amount(75.0, 0.25), 18.75);
        assert_eq!(upfront_amount(54.0, 0.25), 13.5);
        assert_eq!(upfront_amount(9.0, 1.0 / 3.0), 3.0);
    }

    #[test]
    fn references_encode_the_phase() {
        let upfront = merchant_reference(42, PaymentPhase::Upfront, 1_700_000_000);
        let completion = merchant_reference(42, PaymentPhase::Completion, 1_700_000_001);

        assert_eq!(upfront, "JOB-42-1700000000");
        assert_eq!(completion, "JOB-42-COMPLETE-1700000001");
        assert_eq!(parse_reference(&upfront), Some((42, PaymentPhase::Upfront)));
        assert_eq!(
            parse_reference(&completion),
            Some((42, PaymentPhase::Completion))
        );
    }

    #[test]
    fn malformed_references() {
        for reference in ["", "JOB", "JOB-x-1", "ORDER-1-2", "JOB-1", "JOB-1-COMPLETE", "JOB-1-2-3"] {
            assert_eq!(parse_reference(reference), None, "{}", reference);
        }
    }
}
