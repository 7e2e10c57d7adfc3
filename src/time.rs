use chrono::{DateTime, FixedOffset, Utc};

pub fn to_fixed_offset(time: DateTime<Utc>) -> DateTime<FixedOffset> {
    let converted = time.fixed_offset();
    assert_eq!(
        converted.offset().local_minus_utc(),
        0,
        "Offset conversion failed"
    );
    converted
}

pub fn fixed_now() -> DateTime<FixedOffset> {
    to_fixed_offset(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_epoch_instants_convert() {
        let before = DateTime::from_timestamp(-100, 0).expect("valid timestamp");
        let converted = to_fixed_offset(before);
        assert_eq!(converted.timestamp(), -100);
        assert_eq!(converted.offset().local_minus_utc(), 0);
    }
}
