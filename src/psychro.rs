//! Psychrometric derivations.
//!
//! Relative humidity and vapor-pressure deficit from dry/wet bulb pairs
//! (Magnus-form saturation pressure plus the psychrometric relation), and
//! the dewpoint-based RH used for METAR observations. Pressure is in hPa,
//! temperatures in Celsius, VPD in kPa.

/// Standard sea-level pressure, used until a zone reports its own.
pub const SEA_LEVEL_HPA: f64 = 1013.25;

/// Psychrometer coefficient for an unaspirated wet bulb.
const PSYCHROMETER_COEFF: f64 = 0.000_662;

/// Magnus-form saturation vapor pressure (hPa) at temperature `t` (degC).
pub fn saturation_pressure(t: f64) -> f64 {
    6.112 * ((17.67 * t) / (t + 243.5)).exp()
}

/// Actual vapor pressure (hPa) from a dry/wet bulb pair at pressure `p` (hPa).
fn actual_pressure(t_dry: f64, t_wet: f64, p: f64) -> f64 {
    saturation_pressure(t_wet) - PSYCHROMETER_COEFF * p * (t_dry - t_wet)
}

/// Relative humidity (%) from dry and wet bulb temperatures.
pub fn relative_humidity(t_dry: f64, t_wet: f64, pressure: f64) -> f64 {
    let e = actual_pressure(t_dry, t_wet, pressure);
    (e / saturation_pressure(t_dry) * 100.0).clamp(0.0, 100.0)
}

/// Vapor-pressure deficit (kPa) from dry and wet bulb temperatures.
pub fn vapor_pressure_deficit(t_dry: f64, t_wet: f64, pressure: f64) -> f64 {
    let e = actual_pressure(t_dry, t_wet, pressure);
    ((saturation_pressure(t_dry) - e) / 10.0).max(0.0)
}

/// Relative humidity (%) from air temperature and dewpoint.
///
/// Magnus approximation with the METAR-conventional constants; used by the
/// weather producer where no wet bulb exists.
pub fn rh_from_dewpoint(temp_c: f64, dewpoint_c: f64) -> f64 {
    const A: f64 = 17.27;
    const B: f64 = 237.7;
    let gamma_t = (A * temp_c) / (B + temp_c);
    let gamma_d = (A * dewpoint_c) / (B + dewpoint_c);
    ((gamma_d - gamma_t).exp() * 100.0).clamp(0.0, 100.0)
}

/// Round to three decimals, the precision published for derived readings.
pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_at_reference_points() {
        // Standard tables: e_s(0) = 6.112 hPa, e_s(20) ~ 23.4 hPa.
        assert!((saturation_pressure(0.0) - 6.112).abs() < 1e-9);
        assert!((saturation_pressure(20.0) - 23.4).abs() < 0.2);
    }

    #[test]
    fn equal_bulbs_mean_saturation() {
        let rh = relative_humidity(22.0, 22.0, SEA_LEVEL_HPA);
        assert!((rh - 100.0).abs() < 1e-6);
        let vpd = vapor_pressure_deficit(22.0, 22.0, SEA_LEVEL_HPA);
        assert!(vpd.abs() < 1e-9);
    }

    #[test]
    fn wide_depression_stays_in_bounds() {
        // A physically implausible depression must still clamp cleanly.
        let rh = relative_humidity(35.0, 5.0, SEA_LEVEL_HPA);
        assert!((0.0..=100.0).contains(&rh));
        let vpd = vapor_pressure_deficit(35.0, 5.0, SEA_LEVEL_HPA);
        assert!(vpd >= 0.0);
    }

    #[test]
    fn typical_grow_room() {
        // 26 dry / 21 wet at sea level is roughly 65% RH, ~1.2 kPa VPD.
        let rh = relative_humidity(26.0, 21.0, SEA_LEVEL_HPA);
        assert!((60.0..70.0).contains(&rh), "rh = {rh}");
        let vpd = vapor_pressure_deficit(26.0, 21.0, SEA_LEVEL_HPA);
        assert!((0.9..1.5).contains(&vpd), "vpd = {vpd}");
    }

    #[test]
    fn dewpoint_rh() {
        assert!((rh_from_dewpoint(15.0, 15.0) - 100.0).abs() < 1e-6);
        let rh = rh_from_dewpoint(20.0, 10.0);
        assert!((50.0..60.0).contains(&rh), "rh = {rh}");
    }

    #[test]
    fn rounding() {
        assert_eq!(round3(1.23456), 1.235);
        assert_eq!(round3(0.0004), 0.0);
    }
}
