use num_bigint::BigUint;
use num_traits::{One, Zero};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("decrypted value {0} is not a product of the voting options")]
    NotFactorizable(String),
    #[error("decrypted value encodes {found} selections, at most {max} are allowed")]
    TooManySelections { found: usize, max: usize },
    #[error("voting options must be distinct values greater than one")]
    InvalidOptions,
}

/// Recover the voting options whose product is `value`.
///
/// Factors are returned in the order of `options`. Every option divides at
/// most once, and the value must factor completely.
pub fn factorize(value: &BigUint, options: &[BigUint], max_selections: usize) -> Result<Vec<BigUint>, DecodeError> {
    if options.iter().any(|option| option <= &BigUint::one()) {
        return Err(DecodeError::InvalidOptions);
    }
    for (i, option) in options.iter().enumerate() {
        if options[..i].contains(option) {
            return Err(DecodeError::InvalidOptions);
        }
    }

    let mut remainder = value.clone();
    let mut factors = Vec::new();
    for option in options {
        if (&remainder % option).is_zero() {
            remainder /= option;
            factors.push(option.clone());
            if factors.len() > max_selections {
                return Err(DecodeError::TooManySelections {
                    found: factors.len(),
                    max: max_selections,
                });
            }
        }
    }

    if !remainder.is_one() {
        return Err(DecodeError::NotFactorizable(value.to_str_radix(16)));
    }
    Ok(factors)
}
