//! Physical reception gates: line of sight and free-space range

use std::f64::consts::PI;

use crate::radio::Position;

/// Transmitter output, 10 W
pub const TRANSMIT_POWER_DBM: f64 = 40.0;

pub const TRANSMIT_GAIN_DBI: f64 = 0.0;

pub const RECEIVE_GAIN_DBI: f64 = 0.0;

/// Weakest signal a receiver can still resolve
pub const RECEIVER_SENSITIVITY_DBM: f64 = -100.0;

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Maximum free-space range in metres for a transmission at `frequency` Hz.
///
/// Friis: `10^((Ptx + Gtx + Grx - Srx) / 20) * c / (4 * pi * f)`.
pub fn max_range(frequency: f64) -> f64 {
    if frequency <= 0.0 {
        return 0.0;
    }
    let budget_db = TRANSMIT_POWER_DBM + TRANSMIT_GAIN_DBI + RECEIVE_GAIN_DBI - RECEIVER_SENSITIVITY_DBM;
    10f64.powf(budget_db / 20.0) * SPEED_OF_LIGHT / (4.0 * PI * frequency)
}

/// What the roster knows about the sender
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SenderFix {
    pub position: Position,
    pub line_of_sight_loss: f32,
}

/// Line-of-sight gate. Returns the loss to report when reception passes.
///
/// An unknown sender fails. Missing positions on either side pass with no loss.
pub fn line_of_sight(enabled: bool, own: &Position, sender: Option<&SenderFix>) -> Option<f32> {
    if !enabled {
        return Some(0.0);
    }
    let sender = sender?;
    if own.is_unknown() || sender.position.is_unknown() {
        return Some(0.0);
    }
    (sender.line_of_sight_loss < 1.0).then_some(sender.line_of_sight_loss)
}

/// Range gate. Returns distance as a fraction of the maximum range when
/// reception passes.
pub fn in_range(enabled: bool, own: &Position, sender: Option<&SenderFix>, frequency: f64) -> Option<f64> {
    if !enabled {
        return Some(0.0);
    }
    let sender = sender?;
    if own.is_unknown() || sender.position.is_unknown() {
        return Some(0.0);
    }
    let distance = own.distance_to(&sender.position);
    let max = max_range(frequency);
    (distance < max).then(|| distance / max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(x: f64, z: f64, loss: f32) -> SenderFix {
        SenderFix {
            position: Position::new(x, 1000.0, z),
            line_of_sight_loss: loss,
        }
    }

    #[test]
    fn test_higher_frequency_shorter_range() {
        let vhf = max_range(124e6);
        let uhf = max_range(251e6);
        assert!(vhf > uhf);
        // about 950 km at 251 MHz for a 140 dB budget
        assert!((uhf - 950_467.0).abs() < 1.0);
        assert_eq!(max_range(0.0), 0.0);
    }

    #[test]
    fn test_los_gate() {
        let own = Position::new(1.0, 0.0, 1.0);
        assert_eq!(line_of_sight(false, &own, None), Some(0.0));
        assert_eq!(line_of_sight(true, &own, None), None);
        assert_eq!(line_of_sight(true, &own, Some(&fix(5.0, 5.0, 0.25))), Some(0.25));
        assert_eq!(line_of_sight(true, &own, Some(&fix(5.0, 5.0, 1.0))), None);
    }

    #[test]
    fn test_unknown_positions_pass() {
        let nowhere = Position::default();
        let own = Position::new(1.0, 0.0, 1.0);
        assert_eq!(line_of_sight(true, &nowhere, Some(&fix(5.0, 5.0, 1.0))), Some(0.0));
        assert_eq!(line_of_sight(true, &own, Some(&fix(0.0, 0.0, 1.0))), Some(0.0));
        assert_eq!(in_range(true, &nowhere, Some(&fix(9e9, 9e9, 0.0)), 251e6), Some(0.0));
    }

    #[test]
    fn test_range_gate() {
        let own = Position::new(1.0, 1000.0, 1.0);
        let near = fix(1.0, 100_001.0, 0.0);
        let far = fix(1.0, 2_000_001.0, 0.0);
        let ratio = in_range(true, &own, Some(&near), 251e6).unwrap();
        assert!(ratio > 0.0 && ratio < 1.0);
        assert_eq!(in_range(true, &own, Some(&far), 251e6), None);
        assert_eq!(in_range(true, &own, None, 251e6), None);
        assert_eq!(in_range(false, &own, Some(&far), 251e6), Some(0.0));
    }
}
