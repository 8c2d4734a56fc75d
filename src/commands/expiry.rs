use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::{Display, EnumString};
use tokio::time::{Duration, Instant};

use crate::commands::{CommandParser, CommandParserError};

/// How the numeric argument of an expiration is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ExpireOption {
    /// Seconds from now.
    Ex,
    /// Milliseconds from now.
    Px,
    /// Unix time in seconds.
    Exat,
    /// Unix time in milliseconds.
    Pxat,
}

/// An `EX|PX|EXAT|PXAT <n>` pair, as accepted by SET and GETEX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub option: ExpireOption,
    pub amount: u64,
}

impl Expiry {
    pub fn new(option: ExpireOption, amount: u64) -> Expiry {
        Expiry { option, amount }
    }

    /// Parses the option name that was already read from the arguments plus the amount that
    /// follows it.
    pub fn parse(option: &str, parser: &mut CommandParser) -> Result<Expiry, CommandParserError> {
        let option = ExpireOption::from_str(option)
            .map_err(|_| CommandParserError::InvalidExpireOption(option.to_string()))?;

        let amount = match parser.next_integer() {
            Ok(amount) => amount,
            Err(CommandParserError::EndOfStream) => return Err(CommandParserError::EndOfStream),
            Err(_) => return Err(CommandParserError::InvalidExpireValue),
        };
        let amount = u64::try_from(amount).map_err(|_| CommandParserError::InvalidExpireValue)?;

        Ok(Expiry { option, amount })
    }

    /// Parses an optional trailing expiration; no arguments left means no expiration.
    pub fn parse_optional(parser: &mut CommandParser) -> Result<Option<Expiry>, CommandParserError> {
        let option = match parser.next_string() {
            Ok(option) => option,
            Err(CommandParserError::EndOfStream) => return Ok(None),
            Err(err) => return Err(err),
        };

        Expiry::parse(&option, parser).map(Some)
    }

    /// The instant at which the key should expire.
    ///
    /// Absolute options are given in wall-clock time and mapped onto the monotonic clock used
    /// for scheduling. Deadlines in the past map to now.
    pub fn deadline(&self) -> Result<Instant, CommandParserError> {
        let now = Instant::now();

        let remaining = match self.option {
            ExpireOption::Ex => Duration::from_secs(self.amount),
            ExpireOption::Px => Duration::from_millis(self.amount),
            ExpireOption::Exat | ExpireOption::Pxat => {
                let at = UNIX_EPOCH
                    .checked_add(self.offset_from_epoch())
                    .ok_or(CommandParserError::InvalidExpireValue)?;
                at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO)
            }
        };

        now.checked_add(remaining)
            .ok_or(CommandParserError::InvalidExpireValue)
    }

    fn offset_from_epoch(&self) -> Duration {
        match self.option {
            ExpireOption::Exat => Duration::from_secs(self.amount),
            _ => Duration::from_millis(self.amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use bytes::Bytes;
    use tokio::time;

    fn parser(parts: &[&str]) -> CommandParser {
        CommandParser::new(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::copy_from_slice(part.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn parse_options_case_insensitively() {
        assert_eq!(
            Expiry::parse_optional(&mut parser(&["ex", "10"])),
            Ok(Some(Expiry::new(ExpireOption::Ex, 10)))
        );
        assert_eq!(
            Expiry::parse_optional(&mut parser(&["pXaT", "1700000000000"])),
            Ok(Some(Expiry::new(ExpireOption::Pxat, 1_700_000_000_000)))
        );
        assert_eq!(Expiry::parse_optional(&mut parser(&[])), Ok(None));
    }

    #[test]
    fn parse_invalid_expiration() {
        assert_eq!(
            Expiry::parse_optional(&mut parser(&["KEEPTTL", "1"])),
            Err(CommandParserError::InvalidExpireOption("KEEPTTL".to_string()))
        );
        assert_eq!(
            Expiry::parse_optional(&mut parser(&["EX", "soon"])),
            Err(CommandParserError::InvalidExpireValue)
        );
        assert_eq!(
            Expiry::parse_optional(&mut parser(&["PX", "-5"])),
            Err(CommandParserError::InvalidExpireValue)
        );
        assert_eq!(
            Expiry::parse_optional(&mut parser(&["PX"])),
            Err(CommandParserError::EndOfStream)
        );
    }

    #[tokio::test]
    async fn relative_deadlines() {
        time::pause();
        let now = Instant::now();

        assert_eq!(
            Expiry::new(ExpireOption::Ex, 10).deadline(),
            Ok(now + Duration::from_secs(10))
        );
        assert_eq!(
            Expiry::new(ExpireOption::Px, 500).deadline(),
            Ok(now + Duration::from_millis(500))
        );
    }

    #[test]
    fn absolute_deadlines() {
        let unix_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        let deadline = Expiry::new(ExpireOption::Pxat, unix_now + 5_000)
            .deadline()
            .unwrap();
        let remaining = deadline - Instant::now();
        assert!(remaining <= Duration::from_millis(5_000));
        assert!(remaining > Duration::from_millis(4_000));

        let deadline = Expiry::new(ExpireOption::Exat, unix_now / 1000 + 60)
            .deadline()
            .unwrap();
        let remaining = deadline - Instant::now();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(58));
    }

    #[test]
    fn absolute_deadline_in_the_past_is_now() {
        let before = Instant::now();
        let deadline = Expiry::new(ExpireOption::Exat, 1).deadline().unwrap();

        assert!(deadline >= before);
        assert!(deadline <= Instant::now());
    }

    #[test]
    fn overflowing_deadline() {
        assert_eq!(
            Expiry::new(ExpireOption::Ex, u64::MAX).deadline(),
            Err(CommandParserError::InvalidExpireValue)
        );
    }
}
