//! APRS frame codec
//!
//! Pure functions, no I/O: everything here turns structured data into the
//! text payloads APRS-IS expects. Uplink lines have the shape
//! `SRC>DEST,PATH:payload`; position payloads use degrees-minutes
//! coordinates with two decimal minute digits.

/// Meters to feet conversion factor
const FEET_PER_METER: f64 = 3.28084;

/// m/s to knots conversion factor
const KNOTS_PER_MPS: f64 = 1.943_844;

/// Convert a ground speed in m/s to knots
pub fn mps_to_knots(speed_mps: f64) -> f64 {
    speed_mps * KNOTS_PER_MPS
}

/// Telemetry sequence numbers wrap after this value
pub const TELEMETRY_SEQ_MAX: u32 = 999;

/// An APRS symbol: table (or overlay) character plus symbol code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol table or overlay character (`/`, `\`, `0`-`9`, `A`-`Z`)
    pub table: char,
    /// Symbol code within the table
    pub code: char,
}

impl Default for Symbol {
    fn default() -> Self {
        // Primary-table car, the fallback when neither the mapping nor the
        // provisioning names a symbol.
        Symbol {
            table: '/',
            code: '>',
        }
    }
}

/// Encode latitude as `DDMM.mmN`/`DDMM.mmS`, zero-padded.
///
/// A minutes value that rounds to 60.00 carries into the degrees field.
pub fn encode_latitude(degrees: f64) -> String {
    let hemi = if degrees < 0.0 { 'S' } else { 'N' };
    let (deg, minutes) = degrees_minutes(degrees.abs());
    format!("{:02}{:05.2}{}", deg, minutes, hemi)
}

/// Encode longitude as `DDDMM.mmE`/`DDDMM.mmW`, zero-padded.
pub fn encode_longitude(degrees: f64) -> String {
    let hemi = if degrees < 0.0 { 'W' } else { 'E' };
    let (deg, minutes) = degrees_minutes(degrees.abs());
    format!("{:03}{:05.2}{}", deg, minutes, hemi)
}

/// Split absolute degrees into whole degrees and decimal minutes, rounding
/// minutes to two decimals and carrying 60.00 into the degree field.
fn degrees_minutes(abs_degrees: f64) -> (u32, f64) {
    let mut deg = abs_degrees.trunc() as u32;
    let mut minutes = (abs_degrees.fract() * 60.0 * 100.0).round() / 100.0;
    if minutes >= 60.0 {
        minutes -= 60.0;
        deg += 1;
    }
    (deg, minutes)
}

/// Build a position payload:
/// `!<lat><table><lon><symbol>[course/speed][/A=altitudeFeet][comment]`.
///
/// Course/speed are emitted only when at least one is finite; course is
/// folded mod 360 and speed clamped to 0-999 knots, three digits each.
/// Altitude converts meters to feet, clamped to six digits. `phg`, when
/// given, is prepended to the comment (self-beacons only; relayed
/// third-party positions must pass `None`).
pub fn position_payload(
    latitude: f64,
    longitude: f64,
    symbol: Symbol,
    course_deg: Option<f64>,
    speed_knots: Option<f64>,
    altitude_m: Option<f64>,
    phg: Option<&str>,
    comment: &str,
) -> String {
    let mut payload = format!(
        "!{}{}{}{}",
        encode_latitude(latitude),
        symbol.table,
        encode_longitude(longitude),
        symbol.code
    );

    let course_finite = course_deg.is_some_and(f64::is_finite);
    let speed_finite = speed_knots.is_some_and(f64::is_finite);
    if course_finite || speed_finite {
        let course = course_deg
            .filter(|c| c.is_finite())
            .map(|c| (c.round() as i64).rem_euclid(360))
            .unwrap_or(0);
        let speed = speed_knots
            .filter(|s| s.is_finite())
            .map(|s| s.round().clamp(0.0, 999.0) as i64)
            .unwrap_or(0);
        payload.push_str(&format!("{:03}/{:03}", course, speed));
    }

    if let Some(alt_m) = altitude_m.filter(|a| a.is_finite()) {
        let feet = (alt_m * FEET_PER_METER).round().clamp(0.0, 999_999.0) as i64;
        payload.push_str(&format!("/A={:06}", feet));
    }

    if let Some(phg) = phg.filter(|p| !p.is_empty()) {
        payload.push_str(&format!("PHG{}", phg));
    }
    payload.push_str(comment);
    payload
}

/// Build a status payload: `>status text`
pub fn status_payload(text: &str) -> String {
    format!(">{}", text)
}

/// Build a message payload addressed to `addressee`:
/// `:ADDRESSEE:text` with the addressee space-padded to 9 characters.
pub fn message_payload(addressee: &str, text: &str) -> String {
    let mut addr: String = addressee.chars().take(9).collect();
    while addr.len() < 9 {
        addr.push(' ');
    }
    format!(":{}:{}", addr, text)
}

/// Build a full uplink line: `SRC>DEST[,PATH]:payload`
pub fn frame_line(source: &str, destination: &str, path: &[&str], payload: &str) -> String {
    if path.is_empty() {
        format!("{}>{}:{}", source, destination, payload)
    } else {
        format!("{}>{},{}:{}", source, destination, path.join(","), payload)
    }
}

/// Telemetry channel labels for the definition messages, in data-field
/// order: every packet, APRS-forwarded, positions, messages, control.
pub const TELEMETRY_PARAMS: [&str; 5] = ["RxAll", "Fwd", "Pos", "Msg", "Ctl"];

/// Build the three telemetry definition payloads (PARM/UNIT/EQNS) as APRS
/// messages addressed to the sending station itself. Sent once per
/// definition interval, not with every data line.
pub fn telemetry_definitions(callsign: &str) -> Vec<String> {
    vec![
        message_payload(callsign, &format!("PARM.{}", TELEMETRY_PARAMS.join(","))),
        message_payload(callsign, "UNIT.pkt,pkt,pkt,pkt,pkt"),
        message_payload(
            callsign,
            "EQNS.0,1,0,0,1,0,0,1,0,0,1,0,0,1,0",
        ),
    ]
}

/// Build a telemetry data payload:
/// `T#<seq3>,<5 fields clamped 0-999>,00000000`.
///
/// The sequence counter wraps after [`TELEMETRY_SEQ_MAX`].
pub fn telemetry_data(sequence: u32, values: [u64; 5]) -> String {
    let seq = sequence % (TELEMETRY_SEQ_MAX + 1);
    let clamped: Vec<String> = values
        .iter()
        .map(|&v| format!("{}", v.min(999)))
        .collect();
    format!("T#{:03},{},00000000", seq, clamped.join(","))
}

/// Derive the APRS-IS passcode for a callsign base.
///
/// XOR-fold of character pairs of the uppercased base (anything before a
/// `-` SSID separator) into a 15-bit value, seed 0x73E2. Deterministic and
/// bit-for-bit compatible with the reference implementation.
pub fn passcode(callsign: &str) -> u16 {
    let base: String = callsign
        .split('-')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    let bytes = base.as_bytes();

    let mut hash: u16 = 0x73E2;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= (bytes[i] as u16) << 8;
        if i + 1 < bytes.len() {
            hash ^= bytes[i + 1] as u16;
        }
        i += 2;
    }
    hash & 0x7FFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latitude_formatting() {
        assert_eq!(encode_latitude(25.033), "2501.98N");
        assert_eq!(encode_latitude(-33.8568), "3351.41S");
        assert_eq!(encode_latitude(0.0), "0000.00N");
    }

    #[test]
    fn longitude_formatting() {
        assert_eq!(encode_longitude(121.565), "12133.90E");
        assert_eq!(encode_longitude(-122.3321), "12219.93W");
        assert_eq!(encode_longitude(7.5), "00730.00E");
    }

    #[test]
    fn minutes_carry_into_degrees() {
        // 24.99999 degrees: minutes round to 60.00 and must carry
        assert_eq!(encode_latitude(24.999999), "2500.00N");
        assert_eq!(encode_longitude(120.999999), "12100.00E");
    }

    #[test]
    fn bare_position_payload() {
        let payload = position_payload(
            25.033,
            121.565,
            Symbol { table: '/', code: '>' },
            None,
            None,
            None,
            None,
            "",
        );
        assert_eq!(payload, "!2501.98N/12133.90E>");
    }

    #[test]
    fn position_with_course_speed() {
        let payload = position_payload(
            25.033,
            121.565,
            Symbol { table: '/', code: '>' },
            Some(372.0), // folds to 012
            Some(8.6),
            None,
            None,
            "",
        );
        assert_eq!(payload, "!2501.98N/12133.90E>012/009");
    }

    #[test]
    fn position_with_speed_only() {
        let payload = position_payload(
            25.033,
            121.565,
            Symbol { table: '/', code: '>' },
            None,
            Some(1500.0), // clamps to 999
            None,
            None,
            "",
        );
        assert_eq!(payload, "!2501.98N/12133.90E>000/999");
    }

    #[test]
    fn position_with_altitude_and_comment() {
        let payload = position_payload(
            25.033,
            121.565,
            Symbol { table: '/', code: '>' },
            None,
            None,
            Some(100.0), // 328 ft
            None,
            "mesh gw",
        );
        assert_eq!(payload, "!2501.98N/12133.90E>/A=000328mesh gw");
    }

    #[test]
    fn phg_prefixes_comment() {
        let payload = position_payload(
            25.033,
            121.565,
            Symbol { table: '/', code: '>' },
            None,
            None,
            None,
            Some("2360"),
            " igate",
        );
        assert_eq!(payload, "!2501.98N/12133.90E>PHG2360 igate");
    }

    #[test]
    fn frame_line_with_and_without_path() {
        assert_eq!(
            frame_line("N0CALL-10", "APZIGT", &["TCPIP*"], "!payload"),
            "N0CALL-10>APZIGT,TCPIP*:!payload"
        );
        assert_eq!(
            frame_line("N0CALL-10", "APZIGT", &[], ">status"),
            "N0CALL-10>APZIGT:>status"
        );
    }

    #[test]
    fn message_addressee_is_padded_to_nine() {
        assert_eq!(message_payload("N0CALL", "hi"), ":N0CALL   :hi");
        assert_eq!(
            message_payload("LONGCALLSIGN", "hi"),
            ":LONGCALLS:hi"
        );
    }

    #[test]
    fn status_line() {
        assert_eq!(status_payload("igate 0.1.0 up"), ">igate 0.1.0 up");
    }

    #[test]
    fn telemetry_data_clamps_and_wraps() {
        assert_eq!(
            telemetry_data(7, [1, 22, 333, 4444, 0]),
            "T#007,1,22,333,999,0,00000000"
        );
        assert_eq!(
            telemetry_data(1000, [0, 0, 0, 0, 0]),
            "T#000,0,0,0,0,0,00000000"
        );
        assert_eq!(
            telemetry_data(999, [0, 0, 0, 0, 0]),
            "T#999,0,0,0,0,0,00000000"
        );
    }

    #[test]
    fn telemetry_definitions_address_self() {
        let defs = telemetry_definitions("N0CALL-10");
        assert_eq!(defs.len(), 3);
        assert!(defs[0].starts_with(":N0CALL-10:PARM.RxAll,"));
        assert!(defs[1].contains("UNIT."));
        assert!(defs[2].contains("EQNS."));
    }

    #[test]
    fn passcode_reference_values() {
        // The reference algorithm is deterministic: the canonical test
        // vector is N0CALL -> 13023.
        assert_eq!(passcode("N0CALL"), 13023);
        assert_eq!(passcode("n0call"), 13023);
        assert_eq!(passcode("N0CALL-10"), 13023);
        // Determinism across calls
        assert_eq!(passcode("KD8ABC"), passcode("KD8ABC"));
    }
}
