//! Monitor and foil-attenuation normalization.

use crate::error::{Error, Result};
use crate::image::Image;

/// Number of absorber foils in the attenuator stack.
pub const FOIL_COUNT: usize = 4;

/// Attenuation factor for a foil insertion code.
///
/// The code is the decimal rendering of the four foil flags with leading
/// zeros dropped, as scan files store it: `11` means foils 3 and 4 are in
/// (`0011`). The factor is `exp(sum(flag_i * factors[i]))`.
///
/// # Errors
/// Returns [`Error::InvalidMetadata`] if the code has more than four digits
/// or a digit other than 0 or 1, or if a factor is not finite.
pub fn foil_attenuation(factors: &[f64; FOIL_COUNT], code: u32) -> Result<f64> {
    if factors.iter().any(|f| !f.is_finite()) {
        return Err(Error::InvalidMetadata(format!(
            "foil factors must be finite, got {factors:?}"
        )));
    }

    let digits = code.to_string();
    if digits.len() > FOIL_COUNT {
        return Err(Error::InvalidMetadata(format!(
            "foil code {code} has more than {FOIL_COUNT} digits"
        )));
    }

    let padding = FOIL_COUNT - digits.len();
    let mut exponent = 0.0;
    for (offset, digit) in digits.chars().enumerate() {
        match digit {
            '0' => {}
            '1' => exponent += factors[padding + offset],
            other => {
                return Err(Error::InvalidMetadata(format!(
                    "foil code {code} has flag '{other}', expected 0 or 1"
                )));
            }
        }
    }
    Ok(exponent.exp())
}

/// Scales a frame by `attenuation / monitor`.
///
/// # Errors
/// Returns [`Error::InvalidMetadata`] if `monitor` is not a positive finite
/// number or `attenuation` is not finite.
pub fn normalize(image: &Image, attenuation: f64, monitor: f64) -> Result<Image> {
    if !monitor.is_finite() || monitor <= 0.0 {
        return Err(Error::InvalidMetadata(format!(
            "monitor count must be positive, got {monitor}"
        )));
    }
    if !attenuation.is_finite() {
        return Err(Error::InvalidMetadata(format!(
            "attenuation must be finite, got {attenuation}"
        )));
    }
    let scale = attenuation / monitor;
    Ok(Image::from_array(image.as_array().mapv(|v| v * scale)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;

    const FACTORS: [f64; 4] = [0.5, 1.0, 2.0, 4.0];

    #[test]
    fn test_no_foils_is_unity() {
        assert_eq!(foil_attenuation(&FACTORS, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_short_code_is_left_padded() {
        // 11 -> 0011 -> foils 3 and 4
        assert_relative_eq!(foil_attenuation(&FACTORS, 11).unwrap(), 6.0_f64.exp());
        // 1000 -> foil 1 only
        assert_relative_eq!(foil_attenuation(&FACTORS, 1000).unwrap(), 0.5_f64.exp());
        assert_relative_eq!(foil_attenuation(&FACTORS, 1111).unwrap(), 7.5_f64.exp());
    }

    #[test]
    fn test_invalid_codes() {
        assert!(matches!(
            foil_attenuation(&FACTORS, 10_000),
            Err(Error::InvalidMetadata(_))
        ));
        assert!(foil_attenuation(&FACTORS, 12).is_err());
        assert!(foil_attenuation(&[0.0, f64::NAN, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_normalize_scales_and_keeps_masked() {
        let image = Image::new(1, 3, vec![10.0, 20.0, f64::NAN]).unwrap();
        let out = normalize(&image, 2.0, 4.0).unwrap();
        assert_eq!(out.get(0, 0), Some(5.0));
        assert_eq!(out.get(0, 1), Some(10.0));
        assert!(out.get(0, 2).unwrap().is_nan());
    }

    #[test]
    fn test_normalize_rejects_bad_monitor() {
        let image = Image::zeros(2, 2);
        assert!(normalize(&image, 1.0, 0.0).is_err());
        assert!(normalize(&image, 1.0, -3.0).is_err());
        assert!(normalize(&image, 1.0, f64::NAN).is_err());
        assert!(normalize(&image, f64::INFINITY, 1.0).is_err());
    }
}
