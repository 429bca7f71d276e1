//! Random blocks drawn from per-block streams.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Beta, Binomial, Distribution as _, Exp, Gamma, Normal, Poisson, StandardNormal, Uniform};
use rand_pcg::Pcg64;
use tessera_core::{DType, Error, NdArray, Result, RngParams};

/// Sampling distributions supported by [`random_block`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    /// Uniform on `[0, 1)`, drawn directly in the requested float type.
    Random,
    /// Integers in `[low, high)`.
    Integers { low: i64, high: i64 },
    Uniform { low: f64, high: f64 },
    Normal { loc: f64, scale: f64 },
    StandardNormal,
    Exponential { scale: f64 },
    Gamma { shape: f64, scale: f64 },
    Beta { a: f64, b: f64 },
    Poisson { lam: f64 },
    Binomial { n: u64, p: f64 },
}

impl Distribution {
    /// Resolve a distribution by name, with numpy's defaults for omitted
    /// trailing arguments.
    pub fn from_name(name: &str, args: &[f64]) -> Result<Self> {
        let max_args = match name {
            "random" | "standard_normal" => 0,
            "exponential" | "poisson" => 1,
            _ => 2,
        };
        if args.len() > max_args {
            return Err(Error::invalid(
                "distribution_args",
                format!("'{}' takes at most {} argument(s), got {}", name, max_args, args.len()),
            ));
        }
        let arg = |i: usize, default: Option<f64>| {
            args.get(i)
                .copied()
                .or(default)
                .ok_or_else(|| Error::invalid("distribution_args", format!("'{}' is missing argument {}", name, i)))
        };
        Ok(match name {
            "random" => Distribution::Random,
            "integers" => {
                // integers(high) draws from [0, high).
                let (low, high) = match args {
                    [high] => (0.0, *high),
                    _ => (arg(0, None)?, arg(1, None)?),
                };
                Distribution::Integers {
                    low: low as i64,
                    high: high as i64,
                }
            }
            "uniform" => Distribution::Uniform {
                low: arg(0, Some(0.0))?,
                high: arg(1, Some(1.0))?,
            },
            "normal" => Distribution::Normal {
                loc: arg(0, Some(0.0))?,
                scale: arg(1, Some(1.0))?,
            },
            "standard_normal" => Distribution::StandardNormal,
            "exponential" => Distribution::Exponential {
                scale: arg(0, Some(1.0))?,
            },
            "gamma" => Distribution::Gamma {
                shape: arg(0, None)?,
                scale: arg(1, Some(1.0))?,
            },
            "beta" => Distribution::Beta {
                a: arg(0, None)?,
                b: arg(1, None)?,
            },
            "poisson" => Distribution::Poisson {
                lam: arg(0, Some(1.0))?,
            },
            "binomial" => {
                let n = arg(0, None)?;
                if n < 0.0 || n.fract() != 0.0 {
                    return Err(Error::invalid("distribution_args", format!("binomial n must be a count, got {}", n)));
                }
                Distribution::Binomial {
                    n: n as u64,
                    p: arg(1, None)?,
                }
            }
            other => return Err(Error::unsupported("distribution", other)),
        })
    }

    /// Draw `n` values as `f64`.
    fn sample_f64(&self, rng: &mut Pcg64, n: usize) -> Result<Vec<f64>> {
        fn draw<D: rand_distr::Distribution<f64>>(d: D, rng: &mut Pcg64, n: usize) -> Vec<f64> {
            d.sample_iter(rng).take(n).collect()
        }
        let bad = |e: &dyn std::fmt::Display| Error::invalid("distribution_args", e.to_string());
        Ok(match *self {
            Distribution::Random => (0..n).map(|_| rng.random::<f64>()).collect(),
            Distribution::Integers { low, high } => {
                integers(rng, low, high, n)?.into_iter().map(|v| v as f64).collect()
            }
            Distribution::Uniform { low, high } => draw(Uniform::new(low, high).map_err(|e| bad(&e))?, rng, n),
            Distribution::Normal { loc, scale } => draw(Normal::new(loc, scale).map_err(|e| bad(&e))?, rng, n),
            Distribution::StandardNormal => draw(StandardNormal, rng, n),
            Distribution::Exponential { scale } => draw(Exp::new(1.0 / scale).map_err(|e| bad(&e))?, rng, n),
            Distribution::Gamma { shape, scale } => draw(Gamma::new(shape, scale).map_err(|e| bad(&e))?, rng, n),
            Distribution::Beta { a, b } => draw(Beta::new(a, b).map_err(|e| bad(&e))?, rng, n),
            Distribution::Poisson { lam } => draw(Poisson::new(lam).map_err(|e| bad(&e))?, rng, n),
            Distribution::Binomial { n: trials, p } => {
                let d = Binomial::new(trials, p).map_err(|e| bad(&e))?;
                (0..n).map(|_| d.sample(rng) as f64).collect()
            }
        })
    }
}

fn integers(rng: &mut Pcg64, low: i64, high: i64, n: usize) -> Result<Vec<i64>> {
    if low >= high {
        return Err(Error::invalid(
            "distribution_args",
            format!("low {} must be below high {}", low, high),
        ));
    }
    Ok((0..n).map(|_| rng.random_range(low..high)).collect())
}

/// Sample a block of `shape` from the stream identified by `params`.
///
/// `random` draws directly in `float32` or `float64` and `integers` draws
/// exact `int64` values; every other distribution is drawn as `float64`
/// and cast to `dtype`.
pub fn random_block(params: RngParams, dist: &Distribution, shape: &[usize], dtype: DType) -> Result<NdArray> {
    let mut rng = params.rng();
    let n: usize = shape.iter().product();
    match (dist, dtype) {
        (Distribution::Random, DType::Float32) => {
            let data: Vec<f32> = (0..n).map(|_| rng.random::<f32>()).collect();
            NdArray::from_vec(shape, data)
        }
        (Distribution::Integers { low, high }, _) => {
            Ok(NdArray::from_vec(shape, integers(&mut rng, *low, *high, n)?)?.cast(dtype))
        }
        _ => Ok(NdArray::from_vec(shape, dist.sample_f64(&mut rng, n)?)?.cast(dtype)),
    }
}

/// A random permutation of `0..size` as `int64`.
pub fn permutation(params: RngParams, size: usize) -> Result<NdArray> {
    let mut rng = params.rng();
    let mut values: Vec<i64> = (0..size as i64).collect();
    values.shuffle(&mut rng);
    NdArray::from_vec(&[size], values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(jump_index: u64) -> RngParams {
        RngParams { seed: 1337, jump_index }
    }

    #[test]
    fn test_same_stream_same_block() {
        let dist = Distribution::from_name("normal", &[2.0, 0.5]).unwrap();
        let a = random_block(params(3), &dist, &[4, 5], DType::Float64).unwrap();
        let b = random_block(params(3), &dist, &[4, 5], DType::Float64).unwrap();
        let c = random_block(params(4), &dist, &[4, 5], DType::Float64).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_typed_draws() {
        let r = random_block(params(0), &Distribution::Random, &[8], DType::Float32).unwrap();
        assert_eq!(r.dtype(), DType::Float32);
        assert!(r.to_f64().iter().all(|v| (0.0..1.0).contains(v)));

        let ints = Distribution::from_name("integers", &[-3.0, 3.0]).unwrap();
        let i = random_block(params(0), &ints, &[100], DType::Int64).unwrap();
        assert!(i.to_typed::<i64>().iter().all(|v| (-3..3).contains(v)));

        let cast = random_block(params(0), &Distribution::StandardNormal, &[3], DType::Float32).unwrap();
        assert_eq!(cast.dtype(), DType::Float32);
    }

    #[test]
    fn test_distribution_arguments() {
        assert_eq!(
            Distribution::from_name("exponential", &[]).unwrap(),
            Distribution::Exponential { scale: 1.0 }
        );
        assert!(Distribution::from_name("beta", &[1.0]).is_err());
        assert!(Distribution::from_name("random", &[1.0]).is_err());
        assert!(matches!(
            Distribution::from_name("zipf", &[]),
            Err(Error::UnsupportedOperation { .. })
        ));
        let bad_scale = Distribution::from_name("normal", &[0.0, -1.0]).unwrap();
        assert!(random_block(params(0), &bad_scale, &[2], DType::Float64).is_err());
    }

    #[test]
    fn test_permutation_is_a_permutation() {
        let p = permutation(params(9), 50).unwrap().to_typed::<i64>();
        let mut sorted: Vec<i64> = p.iter().copied().collect();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_eq!(permutation(params(9), 50).unwrap().to_typed::<i64>(), p);
    }
}
