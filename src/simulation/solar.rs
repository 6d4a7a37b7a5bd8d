use std::f64::consts::PI;

/// Clear-sky irradiance on the glazing at solar noon (W/m²).
pub const PEAK_IRRADIANCE_W_M2: f64 = 800.0;

/// Daylight window `[start, end)` in hours.
pub const DAYLIGHT: (f64, f64) = (6.0, 18.0);

/// Solar power entering the room through its windows (W).
///
/// Irradiance follows a half-sine between 06:00 and 18:00 and is scaled
/// down linearly by cloud cover. Zero at night.
pub fn solar_gain_w(hour: f64, nebulosity: f64, window_area_m2: f64, transmittance: f64) -> f64 {
    let (sunrise, sunset) = DAYLIGHT;
    if !(sunrise..sunset).contains(&hour) {
        return 0.0;
    }
    let irradiance = PEAK_IRRADIANCE_W_M2 * (1.0 - nebulosity.clamp(0.0, 1.0));
    let angle_factor = (PI * (hour - sunrise) / 12.0).sin();
    irradiance * angle_factor * window_area_m2 * transmittance
}
