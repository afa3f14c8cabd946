use ndarray::{Array1, ArrayView2};

/// Sentinel for a missing genotype entry (individual untyped at a site).
pub const MISSING_DOSAGE: i16 = -1;

/// Computes per-site derived-allele frequencies for one population.
///
/// `gts` is a sites x individuals matrix of derived-allele dosages in
/// `0..=ploidy`, with `MISSING_DOSAGE` marking untyped individuals. Each
/// site's frequency is the derived-allele count over the non-missing allele
/// observations at that site (individuals * ploidy, minus missing entries).
/// A site with no non-missing observations yields NaN; missing data never
/// raises here, interpretation is left to the calculators.
///
/// `flip`, when present, carries one flag per site: `true` means the encoded
/// ALT allele is actually ancestral, so the dosage axis is inverted before
/// counting. Callers pass `None` when no ancestral-allele information is
/// available, in which case the ALT allele is taken as derived.
pub fn site_frequencies(gts: ArrayView2<i16>, ploidy: u32, flip: Option<&[bool]>) -> Array1<f64> {
    let n_sites = gts.nrows();
    let mut freqs = Array1::from_elem(n_sites, f64::NAN);

    for (i, row) in gts.rows().into_iter().enumerate() {
        let mut derived: i64 = 0;
        let mut observed: i64 = 0;
        for &dosage in row.iter() {
            if dosage == MISSING_DOSAGE {
                continue;
            }
            let dosage = if flip.map_or(false, |f| f[i]) {
                ploidy as i16 - dosage
            } else {
                dosage
            };
            derived += dosage as i64;
            observed += ploidy as i64;
        }
        if observed > 0 {
            freqs[i] = derived as f64 / observed as f64;
        }
    }

    freqs
}

/// The U statistic: the number of sites where the derived allele is rare in
/// the reference population (`ref < w`), common in the target (`tgt > x`),
/// and at an exact expected frequency in every source population
/// (`src_i == y_list[i]`).
///
/// Returns the count as a float together with the qualifying positions in
/// position order. Sites with a NaN frequency in any population never
/// qualify (NaN comparisons are false). A zero-site window yields
/// `(NaN, [])` rather than a zero count.
pub fn calc_u(
    ref_freq: &Array1<f64>,
    tgt_freq: &Array1<f64>,
    src_freqs: &[Array1<f64>],
    pos: &[i64],
    w: f64,
    x: f64,
    y_list: &[f64],
) -> (f64, Vec<i64>) {
    if pos.is_empty() {
        return (f64::NAN, Vec::new());
    }

    let candidates: Vec<i64> = (0..pos.len())
        .filter(|&i| {
            ref_freq[i] < w
                && tgt_freq[i] > x
                && src_freqs
                    .iter()
                    .zip(y_list)
                    .all(|(src, &y)| src[i] == y)
        })
        .map(|i| pos[i])
        .collect();

    (candidates.len() as f64, candidates)
}

/// The Q statistic: among sites where the derived allele is rare in the
/// reference (`ref < w`) and at its expected frequency in every source
/// population, the `quantile`-th quantile of the target-population
/// frequencies. Sites with a NaN frequency in any involved population are
/// excluded from the restricted set, exactly as for U.
///
/// The candidate list is the restricted site set itself, position-ordered;
/// it characterizes the set and does not depend on the requested quantile.
/// An empty restricted set yields `(NaN, [])`.
pub fn calc_q(
    ref_freq: &Array1<f64>,
    tgt_freq: &Array1<f64>,
    src_freqs: &[Array1<f64>],
    pos: &[i64],
    w: f64,
    y_list: &[f64],
    quantile: f64,
) -> (f64, Vec<i64>) {
    let mut tgt_values = Vec::new();
    let mut candidates = Vec::new();

    for i in 0..pos.len() {
        let restricted = ref_freq[i] < w
            && !tgt_freq[i].is_nan()
            && src_freqs
                .iter()
                .zip(y_list)
                .all(|(src, &y)| src[i] == y);
        if restricted {
            tgt_values.push(tgt_freq[i]);
            candidates.push(pos[i]);
        }
    }

    if tgt_values.is_empty() {
        return (f64::NAN, Vec::new());
    }

    (quantile_linear(&mut tgt_values, quantile), candidates)
}

/// The fd statistic (ABBA-BABA derived ratio) over one window.
///
/// Per site, with p1/p2/p3 the reference/target/source derived frequencies,
/// the numerator is ABBA - BABA = (1-p1)*p2*p3 - p1*(1-p2)*p3, and the
/// denominator substitutes pd = max(p2, p3) for both the target and source
/// frequencies. Both terms are summed across the window before dividing.
/// A summed denominator of zero (no ABBA/BABA contrast anywhere in the
/// window, e.g. all three populations identical at every site) yields NaN.
pub fn calc_fd(ref_freq: &Array1<f64>, tgt_freq: &Array1<f64>, src_freq: &Array1<f64>) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;

    for i in 0..ref_freq.len() {
        let (p1, p2, p3) = (ref_freq[i], tgt_freq[i], src_freq[i]);
        let pd = p2.max(p3);
        num += (1.0 - p1) * p2 * p3 - p1 * (1.0 - p2) * p3;
        den += (1.0 - p1) * pd * pd - p1 * (1.0 - pd) * pd;
    }

    if den == 0.0 {
        f64::NAN
    } else {
        num / den
    }
}

/// The df statistic: the net derived-frequency excess of the source over the
/// target, normalized by the summed magnitude of the per-site differences:
///
///   df = sum(p3 - p2) / sum(|p3 - p2|)
///
/// The scale term vanishes exactly when target and source carry identical
/// frequencies at every site (in particular whenever the two genotype
/// matrices are equal), in which case the result is NaN.
pub fn calc_df(_ref_freq: &Array1<f64>, tgt_freq: &Array1<f64>, src_freq: &Array1<f64>) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;

    for i in 0..tgt_freq.len() {
        let (p2, p3) = (tgt_freq[i], src_freq[i]);
        num += p3 - p2;
        den += (p3 - p2).abs();
    }

    if den == 0.0 {
        f64::NAN
    } else {
        num / den
    }
}

/// Quantile with linear interpolation between adjacent order statistics
/// (the numpy default convention). Sorts `values` in place. `q` must lie in
/// [0,1], which the argument layer guarantees before it reaches this point.
pub fn quantile_linear(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let h = (values.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    values[lo] + (h - lo as f64) * (values[hi] - values[lo])
}
