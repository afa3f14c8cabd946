use crate::process::{
    FeatureEmitter, GenotypeWindow, ResultWriter, ScanError, StatSpec, WindowResult,
};

use ndarray::{array, Array2};
use std::fs;
use tempfile::tempdir;

fn emitter(stat: &str, w: f64, y: Vec<f64>, anc_available: bool) -> FeatureEmitter {
    FeatureEmitter::new(
        StatSpec::parse(stat).unwrap(),
        w,
        y,
        "REF".to_string(),
        "TGT".to_string(),
        vec!["SRC".to_string()],
        anc_available,
    )
    .unwrap()
}

fn haploid_window() -> GenotypeWindow {
    GenotypeWindow {
        chr_name: "21".to_string(),
        start: 100,
        end: 400,
        positions: vec![100, 200, 300],
        ref_gts: Some(array![[0, 1], [1, 1], [0, 0]]),
        tgt_gts: Some(array![[0, 0], [1, 1], [1, 1]]),
        src_gts_list: Some(vec![array![[1, 1], [1, 1], [0, 0]]]),
        ploidy: Some(1),
        anc_flip: None,
    }
}

#[test]
fn test_emitter_u_end_to_end() {
    let emitter = emitter("U50", 0.6, vec![0.0], false);
    let result = emitter.run(&haploid_window());

    assert_eq!(result.chr_name, "21");
    assert_eq!((result.start, result.end), (100, 400));
    assert_eq!(result.ref_pop, "REF");
    assert_eq!(result.tgt_pop, "TGT");
    assert_eq!(result.src_pop_list, vec!["SRC".to_string()]);
    assert_eq!(result.nsnps, 3);
    // Only position 300 has ref < 0.6, tgt > 0.5, src == 0.0.
    assert_eq!(result.statistic, 1.0);
    assert_eq!(result.candidates, vec![300]);
}

#[test]
fn test_emitter_q_candidates_are_restricted_set() {
    let emitter_hi = emitter("Q95", 0.6, vec![1.0], false);
    let emitter_lo = emitter("Q05", 0.6, vec![1.0], false);
    let window = haploid_window();

    let hi = emitter_hi.run(&window);
    let lo = emitter_lo.run(&window);
    // Restricted set: position 100 (ref 0.5 < 0.6, src == 1.0).
    assert_eq!(hi.candidates, vec![100]);
    assert_eq!(lo.candidates, hi.candidates);
    assert_eq!(hi.statistic, 0.0);
}

#[test]
fn test_emitter_fd_df_never_emit_candidates() {
    let window = haploid_window();

    let fd = emitter("fd", 0.01, Vec::new(), false).run(&window);
    assert!((fd.statistic - (-1.0 / 3.0)).abs() < 1e-12);
    assert!(fd.candidates.is_empty());

    let df = emitter("df", 0.01, Vec::new(), false).run(&window);
    assert!(df.statistic.is_finite());
    assert!(df.candidates.is_empty());
}

#[test]
fn test_missing_inputs_short_circuit_to_nan() {
    for stat in ["U50", "Q95", "fd", "df"] {
        let y = if stat.starts_with('U') || stat.starts_with('Q') {
            vec![1.0]
        } else {
            Vec::new()
        };
        let emitter = emitter(stat, 0.01, y, false);

        for drop in 0..4 {
            let mut window = haploid_window();
            match drop {
                0 => window.ref_gts = None,
                1 => window.tgt_gts = None,
                2 => window.src_gts_list = None,
                _ => window.ploidy = None,
            }
            let result = emitter.run(&window);
            assert!(
                result.statistic.is_nan(),
                "{} with missing input {} should be NaN",
                stat,
                drop
            );
            assert!(result.candidates.is_empty());
            assert_eq!(result.nsnps, 3);
        }
    }
}

#[test]
fn test_zero_site_window_is_nan() {
    let mut window = haploid_window();
    window.positions = Vec::new();
    window.ref_gts = Some(Array2::zeros((0, 2)));
    window.tgt_gts = Some(Array2::zeros((0, 2)));
    window.src_gts_list = Some(vec![Array2::zeros((0, 2))]);

    for stat in ["U50", "Q95", "fd", "df"] {
        let y = if stat == "fd" || stat == "df" {
            Vec::new()
        } else {
            vec![1.0]
        };
        let result = emitter(stat, 0.01, y, false).run(&window);
        assert!(result.statistic.is_nan(), "{} over zero sites", stat);
        assert!(result.candidates.is_empty());
        assert_eq!(result.nsnps, 0);
    }
}

#[test]
fn test_ancestral_flags_only_consulted_when_available() {
    let mut window = haploid_window();
    window.anc_flip = Some(vec![true, true, true]);

    let with_anc = emitter("U50", 0.6, vec![0.0], true).run(&window);
    let without_anc = emitter("U50", 0.6, vec![0.0], false).run(&window);

    // Flipping every site reorients the frequency axis, so the qualifying
    // sites differ from the unpolarized run.
    assert_eq!(without_anc.statistic, 1.0);
    assert_ne!(with_anc.candidates, without_anc.candidates);
}

#[test]
fn test_expected_frequency_list_must_pair_with_sources() {
    let err = FeatureEmitter::new(
        StatSpec::parse("U50").unwrap(),
        0.01,
        vec![1.0],
        "REF".to_string(),
        "TGT".to_string(),
        vec!["SRC1".to_string(), "SRC2".to_string()],
        false,
    )
    .unwrap_err();
    assert!(matches!(err, ScanError::Config(_)));

    // fd carries no expected-frequency list.
    assert!(FeatureEmitter::new(
        StatSpec::parse("fd").unwrap(),
        0.01,
        Vec::new(),
        "REF".to_string(),
        "TGT".to_string(),
        vec!["SRC".to_string()],
        false,
    )
    .is_ok());
}

#[test]
fn test_emitter_is_idempotent() {
    let emitter = emitter("Q95", 0.6, vec![1.0], false);
    assert_eq!(emitter.spec().code, "Q95");
    assert!(!emitter.anc_allele_available());
    let window = haploid_window();

    let first = emitter.run(&window);
    let second = emitter.run(&window);
    assert_eq!(first.statistic.to_bits(), second.statistic.to_bits());
    assert_eq!(first.candidates, second.candidates);
}

#[test]
fn test_result_writer_serialization() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("results.tsv");

    let scored = WindowResult {
        chr_name: "21".to_string(),
        start: 100,
        end: 400,
        ref_pop: "REF".to_string(),
        tgt_pop: "TGT".to_string(),
        src_pop_list: vec!["SRC1".to_string(), "SRC2".to_string()],
        nsnps: 3,
        statistic: 2.0,
        candidates: vec![100, 300],
    };
    let undefined = WindowResult {
        statistic: f64::NAN,
        candidates: Vec::new(),
        nsnps: 0,
        ..scored.clone()
    };

    let mut writer = ResultWriter::create(&path).unwrap();
    writer.write(&scored).unwrap();
    writer.write(&undefined).unwrap();
    writer.flush().unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "21\t100\t400\tREF\tTGT\tSRC1,SRC2\t3\t2\t21:100,21:300");
    assert_eq!(lines[1], "21\t100\t400\tREF\tTGT\tSRC1,SRC2\t0\tnan\tNA");
}
