use crate::calibration::{Outcome, Prob3};
use crate::domain::MarketOdds;

/// `p * odds - 1`. A missing or unusable price yields 0.0 so the candidate can
/// still be judged on confidence alone.
pub fn expected_value(probability: f64, odds: Option<f64>) -> f64 {
    match odds {
        Some(price) if price.is_finite() && price > 1.0 && probability.is_finite() => {
            probability * price - 1.0
        }
        _ => 0.0,
    }
}

/// EV of backing `outcome` at the market's price for that outcome only.
pub fn outcome_value(probabilities: &Prob3, outcome: Outcome, odds: &MarketOdds) -> (f64, Option<f64>) {
    let price = odds.price(outcome);
    (expected_value(probabilities.get(outcome), price), price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ev_matches_hand_calculation() {
        assert!((expected_value(0.75, Some(1.80)) - 0.35).abs() < 1e-12);
        assert!((expected_value(0.40, Some(2.0)) + 0.2).abs() < 1e-12);
    }

    #[test]
    fn missing_or_bad_odds_give_zero() {
        assert_eq!(expected_value(0.9, None), 0.0);
        assert_eq!(expected_value(0.9, Some(1.0)), 0.0);
        assert_eq!(expected_value(0.9, Some(f64::NAN)), 0.0);
    }

    #[test]
    fn uses_price_of_predicted_outcome() {
        let odds = MarketOdds {
            team1: Some(1.5),
            draw: None,
            team2: Some(3.0),
        };
        let p = Prob3::from_array([0.2, 0.0, 0.8]);
        let (ev, price) = outcome_value(&p, Outcome::Team2, &odds);
        assert_eq!(price, Some(3.0));
        assert!((ev - 1.4).abs() < 1e-12);
        assert_eq!(outcome_value(&p, Outcome::Draw, &odds), (0.0, None));
    }
}
