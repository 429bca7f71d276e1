//! Mergeable streaming quantile summary (merging t-digest).
//!
//! Each block builds a digest of its values; digests from every block are
//! merged into one and queried for approximate quantiles, so raw data never
//! has to be gathered to a single device.

/// Default compression, matching the usual t-digest default.
pub const DEFAULT_COMPRESSION: f64 = 100.0;

/// A weighted cluster of nearby values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub mean: f64,
    pub weight: f64,
}

/// Merging t-digest.
#[derive(Debug, Clone, PartialEq)]
pub struct TDigest {
    compression: f64,
    centroids: Vec<Centroid>,
    total_weight: f64,
    min: f64,
    max: f64,
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION)
    }
}

impl TDigest {
    pub fn new(compression: f64) -> Self {
        Self {
            compression,
            centroids: Vec::new(),
            total_weight: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    /// Number of values summarised (sum of centroid weights).
    pub fn count(&self) -> f64 {
        self.total_weight
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Add values to the digest. NaNs are skipped.
    pub fn update<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        let mut incoming: Vec<Centroid> = values
            .into_iter()
            .filter(|v| !v.is_nan())
            .map(|mean| Centroid { mean, weight: 1.0 })
            .collect();
        if incoming.is_empty() {
            return;
        }
        incoming.append(&mut self.centroids);
        self.rebuild(incoming);
    }

    /// Merge several digests into a new one.
    pub fn merge<'a, I: IntoIterator<Item = &'a TDigest>>(digests: I) -> TDigest {
        let mut merged = TDigest::new(DEFAULT_COMPRESSION);
        let mut all = Vec::new();
        for d in digests {
            merged.compression = d.compression;
            merged.min = merged.min.min(d.min);
            merged.max = merged.max.max(d.max);
            all.extend_from_slice(&d.centroids);
        }
        merged.rebuild(all);
        merged
    }

    fn rebuild(&mut self, mut centroids: Vec<Centroid>) {
        centroids.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        let total: f64 = centroids.iter().map(|c| c.weight).sum();
        self.total_weight = total;
        if let (Some(first), Some(last)) = (centroids.first(), centroids.last()) {
            self.min = self.min.min(first.mean);
            self.max = self.max.max(last.mean);
        }

        let mut out: Vec<Centroid> = Vec::with_capacity(centroids.len());
        let mut weight_before = 0.0;
        for c in centroids {
            if let Some(cur) = out.last_mut() {
                let proposed = cur.weight + c.weight;
                let q0 = weight_before / total;
                let q1 = (weight_before + proposed) / total;
                let limit = 4.0 * total * (q0 * (1.0 - q0)).min(q1 * (1.0 - q1)) / self.compression;
                if proposed <= limit.max(1.0) {
                    cur.mean += (c.mean - cur.mean) * c.weight / proposed;
                    cur.weight = proposed;
                    continue;
                }
                weight_before += cur.weight;
            }
            out.push(c);
        }
        self.centroids = out;
    }

    /// Approximate value at quantile `q` in `[0, 1]`. NaN for an empty digest.
    pub fn quantile(&self, q: f64) -> f64 {
        if self.centroids.is_empty() {
            return f64::NAN;
        }
        if q <= 0.0 {
            return self.min;
        }
        if q >= 1.0 {
            return self.max;
        }
        if self.centroids.len() == 1 {
            return self.centroids[0].mean;
        }

        let target = q * self.total_weight;
        let mut cumulative = 0.0;
        let mut prev = (0.0, self.min);
        for c in &self.centroids {
            let center = cumulative + c.weight / 2.0;
            if target < center {
                return lerp(prev, (center, c.mean), target);
            }
            cumulative += c.weight;
            prev = (center, c.mean);
        }
        lerp(prev, (self.total_weight, self.max), target)
    }
}

fn lerp((x0, y0): (f64, f64), (x1, y1): (f64, f64), x: f64) -> f64 {
    if x1 <= x0 {
        return y1;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_digest_is_nan() {
        assert!(TDigest::default().quantile(0.5).is_nan());
    }

    #[test]
    fn test_uniform_quantiles() {
        let mut d = TDigest::default();
        d.update((0..10_000).map(|i| i as f64));
        assert_eq!(d.count(), 10_000.0);
        assert!((d.quantile(0.5) - 5_000.0).abs() < 50.0);
        assert!((d.quantile(0.9) - 9_000.0).abs() < 50.0);
        assert_eq!(d.quantile(0.0), 0.0);
        assert_eq!(d.quantile(1.0), 9_999.0);
        assert!(d.centroids().len() < 1_000);
    }

    #[test]
    fn test_merge_matches_single_digest() {
        let mut left = TDigest::default();
        let mut right = TDigest::default();
        left.update((0..5_000).map(|i| i as f64));
        right.update((5_000..10_000).map(|i| i as f64));
        let merged = TDigest::merge([&left, &right]);
        assert_eq!(merged.count(), 10_000.0);
        assert!((merged.quantile(0.25) - 2_500.0).abs() < 75.0);
    }
}
