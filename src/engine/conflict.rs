use chrono::Datelike;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_ordered() {
        return Err(EngineError::Validation(format!(
            "start date {} must be before end date {}",
            span.start, span.end
        )));
    }
    if span.start.year() < MIN_VALID_YEAR || span.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if span.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// First restriction in `restrictions` that overlaps `span`, as a conflict.
pub(crate) fn check_no_conflict(
    room_id: RoomId,
    restrictions: &[RoomRestriction],
    span: &Span,
) -> Result<(), EngineError> {
    match restrictions.iter().find(|r| r.span.overlaps(span)) {
        Some(r) => Err(EngineError::Conflict {
            room_id,
            restriction_id: r.id,
        }),
        None => Ok(()),
    }
}

/// Shape checks the guest form is expected to have done already.
pub(crate) fn validate_guest(guest: &GuestContact) -> Result<(), EngineError> {
    let required = [
        ("first_name", &guest.first_name),
        ("last_name", &guest.last_name),
        ("email", &guest.email),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(EngineError::Validation(format!("{field} is required")));
        }
    }
    for value in [&guest.first_name, &guest.last_name, &guest.email, &guest.phone] {
        if value.len() > MAX_GUEST_FIELD_LEN {
            return Err(EngineError::LimitExceeded("guest field too long"));
        }
    }
    if guest.first_name.trim().chars().count() < MIN_FIRST_NAME_LEN {
        return Err(EngineError::Validation(format!(
            "first_name must be at least {MIN_FIRST_NAME_LEN} characters long"
        )));
    }
    if !looks_like_email(guest.email.trim()) {
        return Err(EngineError::Validation("email is not a valid address".into()));
    }
    Ok(())
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn guest() -> GuestContact {
        GuestContact {
            first_name: "John".into(),
            last_name: "Smith".into(),
            email: "john@smith.com".into(),
            phone: "123456789".into(),
        }
    }

    #[test]
    fn unordered_span_rejected() {
        let err = validate_span(&span("2050-12-31", "2050-12-31")).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = validate_span(&span("2050-01-02", "2050-01-01")).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(validate_span(&span("2050-01-01", "2050-01-02")).is_ok());
    }

    #[test]
    fn span_limits() {
        assert_eq!(
            validate_span(&span("1999-12-30", "2000-01-02")),
            Err(EngineError::LimitExceeded("date out of range"))
        );
        assert_eq!(
            validate_span(&span("2050-01-01", "2052-01-01")),
            Err(EngineError::LimitExceeded("span too wide"))
        );
    }

    #[test]
    fn conflict_reports_first_overlap() {
        let blocking = RoomRestriction {
            id: Ulid::new(),
            room_id: 1,
            span: span("2050-01-03", "2050-01-05"),
            kind: RestrictionKind::OwnerBlock,
        };
        let restrictions = vec![blocking.clone()];
        assert!(check_no_conflict(1, &restrictions, &span("2050-01-01", "2050-01-03")).is_ok());
        assert!(check_no_conflict(1, &restrictions, &span("2050-01-05", "2050-01-06")).is_ok());
        assert_eq!(
            check_no_conflict(1, &restrictions, &span("2050-01-04", "2050-01-10")),
            Err(EngineError::Conflict { room_id: 1, restriction_id: blocking.id })
        );
    }

    #[test]
    fn guest_ok() {
        assert!(validate_guest(&guest()).is_ok());
    }

    #[test]
    fn guest_phone_is_optional() {
        let g = GuestContact { phone: String::new(), ..guest() };
        assert!(validate_guest(&g).is_ok());
    }

    #[test]
    fn guest_missing_field() {
        let g = GuestContact { last_name: "  ".into(), ..guest() };
        assert_eq!(
            validate_guest(&g),
            Err(EngineError::Validation("last_name is required".into()))
        );
    }

    #[test]
    fn guest_short_first_name() {
        let g = GuestContact { first_name: "J".into(), ..guest() };
        assert!(matches!(validate_guest(&g), Err(EngineError::Validation(_))));
    }

    #[test]
    fn email_shapes() {
        assert!(looks_like_email("me@here.ca"));
        assert!(!looks_like_email("me@here"));
        assert!(!looks_like_email("@here.ca"));
        assert!(!looks_like_email("me here@x.ca"));
        assert!(!looks_like_email("a@b@c.com"));
        assert!(!looks_like_email("x"));
    }
}
