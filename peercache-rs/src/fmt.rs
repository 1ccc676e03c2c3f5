//! Provides helpers to parse and format byte sizes.
//!
//! Memory limits in the config are given as human readable sizes like "64m" and the group report
//! renders the memory usage the same way.

const UNITS: [&str; 6] = ["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a given size in bytes.
///
/// This function determines the ideal unit (ranging from bytes to petabytes) to provide
/// a concise representation.
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::format_size(0), "0 bytes");
/// assert_eq!(peercache::fmt::format_size(1), "1 byte");
/// assert_eq!(peercache::fmt::format_size(100), "100 bytes");
/// assert_eq!(peercache::fmt::format_size(2_048), "2.00 KiB");
/// assert_eq!(peercache::fmt::format_size(8_734), "8.53 KiB");
/// assert_eq!(peercache::fmt::format_size(87_340), "85.3 KiB");
/// assert_eq!(peercache::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(peercache::fmt::format_size(8_734_000), "8.33 MiB");
/// assert_eq!(peercache::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    match size_in_bytes {
        1 => "1 byte".to_owned(),
        size if size < 1024 => format!("{} bytes", size),
        _ => {
            let mut size = size_in_bytes as f64;
            let mut unit = 0;
            while size >= 1024. && unit < UNITS.len() - 1 {
                size /= 1024.;
                unit += 1;
            }

            if size < 10. {
                format!("{:.2} {}", size, UNITS[unit])
            } else if size < 100. {
                format!("{:.1} {}", size, UNITS[unit])
            } else {
                format!("{:.0} {}", size, UNITS[unit])
            }
        }
    }
}

/// Parses a size from a given string.
///
/// This string can have the following (case insensitive) suffixes:
/// * **b**: treats the value as bytes (which is also the default)
/// * **k**: multiplies the given value by 1024 thus treats the value as KiB
/// * **m**: treats the value as MiB
/// * **g**: treats the value as GiB
/// * **t**: treats the value as TiB
///
/// Returns an **Err** if either a non-integer value is given, an unknown suffix was provided or
/// if the resulting size doesn't fit into an **usize**.
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("8k").unwrap(), 8192);
/// assert_eq!(peercache::fmt::parse_size("2 M").unwrap(), 2 * 1024 * 1024);
/// assert_eq!(peercache::fmt::parse_size(" 4g ").unwrap(), 4 * 1024 * 1024 * 1024);
///
/// // An invalid suffix results in an error...
/// assert_eq!(peercache::fmt::parse_size("3 Y").is_err(), true);
///
/// // Decimal or negative numbers result in an error...
/// assert_eq!(peercache::fmt::parse_size("1.2g").is_err(), true);
/// assert_eq!(peercache::fmt::parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^\s*(\d+)\s*([bkmgtBKMGT]?)\s*$").unwrap();
    }

    let input = str.as_ref();
    let captures = NUMBER_AND_SUFFIX.captures(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a size. Expected a positive number and optionally \
             'b', 'k', 'm', 'g' or 't' as suffix.",
            input
        )
    })?;

    let number = captures[1]
        .parse::<usize>()
        .map_err(|error| anyhow::anyhow!("Cannot parse '{}' into a size: {}", input, error))?;
    let shift = match captures[2].to_ascii_lowercase().as_str() {
        "k" => 10,
        "m" => 20,
        "g" => 30,
        "t" => 40,
        _ => 0,
    };

    number
        .checked_mul(1 << shift)
        .ok_or_else(|| anyhow::anyhow!("The size '{}' is too large.", input))
}
