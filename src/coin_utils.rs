/// Satoshis per whole coin.
pub const COIN: f64 = 100_000_000.0;

/// Hashes represented by one difficulty-1 share.
pub const SHARE_HASHES: f64 = 65_536.0;

/// Converts a compact `bits` target (8 hex digits) into a difficulty, relative
/// to the difficulty-1 target `0x1d00ffff`.
pub fn bits_to_difficulty(bits: &str) -> Option<f64> {
  if bits.len() != 8 {
    return None;
  }
  let compact = u32::from_str_radix(bits, 16).ok()?;
  let exponent = (compact >> 24) as i32;
  let mantissa = compact & 0x00ff_ffff;
  if mantissa == 0 {
    return None;
  }
  Some((0xffff as f64 / mantissa as f64) * 256f64.powi(0x1d - exponent))
}

pub fn to_coins(satoshis: i64) -> f64 {
  satoshis as f64 / COIN
}

/// Rounds to `sig` significant figures and formats without trailing noise.
pub fn format_sig(value: f64, sig: i32) -> String {
  if value == 0.0 || !value.is_finite() {
    return "0".to_owned();
  }
  let magnitude = value.abs().log10().floor() as i32;
  let decimals = sig - 1 - magnitude;
  if decimals > 0 {
    format!("{:.*}", decimals as usize, value)
  } else {
    let scale = 10f64.powi(-decimals);
    format!("{:.0}", (value / scale).round() * scale)
  }
}

/// Formats a span of seconds as `H:MM:SS`, prefixed with whole days when
/// there are any.
pub fn format_duration(seconds: i64) -> String {
  let seconds = seconds.max(0);
  let days = seconds / 86_400;
  let rest = seconds % 86_400;
  let clock = format!("{}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
  match days {
    0 => clock,
    1 => format!("1 day, {}", clock),
    _ => format!("{} days, {}", days, clock),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_bits_to_difficulty() {
    assert_eq!(bits_to_difficulty("1d00ffff"), Some(1.0));
    let difficulty = bits_to_difficulty("1b0404cb").unwrap();
    assert!((difficulty - 16307.4209).abs() < 1e-3);
    assert_eq!(bits_to_difficulty("1d000000"), None);
    assert_eq!(bits_to_difficulty("nothex!!"), None);
    assert_eq!(bits_to_difficulty("1d00ff"), None);
  }

  #[test]
  fn test_format_sig() {
    assert_eq!(format_sig(0.0012345, 3), "0.00123");
    assert_eq!(format_sig(12.3456, 3), "12.3");
    assert_eq!(format_sig(1234.5, 3), "1230");
    assert_eq!(format_sig(0.0, 3), "0");
  }

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(312), "0:05:12");
    assert_eq!(format_duration(90_061), "1 day, 1:01:01");
    assert_eq!(format_duration(2 * 86_400), "2 days, 0:00:00");
    assert_eq!(format_duration(-5), "0:00:00");
  }
}
