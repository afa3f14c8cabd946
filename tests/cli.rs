use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const VCF: &str = "\
##fileformat=VCFv4.2
##contig=<ID=21>
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tr1\tr2\tt1\tt2\ts1\ts2
21\t100\t.\tA\tT\t.\t.\t.\tGT\t0|0\t0|0\t1|1\t1|1\t1|1\t1|1
21\t200\t.\tG\tA\t.\t.\t.\tGT\t0|0\t0|1\t1|1\t1|0\t1|1\t1|0
21\t300\t.\tT\tC\t.\t.\t.\tGT\t1|1\t1|1\t0|0\t0|0\t0|0\t0|0
";

const PANEL: &str = "REF,r1,r2\nTGT,t1,t2\nSRC,s1,s2\n";

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn scores_u_statistic_over_one_window() {
    let dir = tempfile::tempdir().unwrap();
    let vcf = write_file(&dir, "chr21.vcf", VCF);
    let panel = write_file(&dir, "panel.csv", PANEL);
    let output = dir.path().join("results.tsv");

    Command::cargo_bin("introscan")
        .unwrap()
        .args([
            "--vcf",
            vcf.to_str().unwrap(),
            "--chr",
            "21",
            "--populations",
            panel.to_str().unwrap(),
            "--ref",
            "REF",
            "--tgt",
            "TGT",
            "--src",
            "SRC",
            "--stat",
            "U50",
            "--w",
            "0.3",
            "--y",
            "1.0",
            "--output",
            output.to_str().unwrap(),
            "--threads",
            "1",
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);

    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields.len(), 9);
    assert_eq!(fields[0], "21");
    assert_eq!(fields[3], "REF");
    assert_eq!(fields[4], "TGT");
    assert_eq!(fields[5], "SRC");
    assert_eq!(fields[6], "3");
    // Position 100: ref 0.0 < 0.3, tgt 1.0 > 0.5, src fixed at 1.0.
    assert_eq!(fields[7], "1");
    assert_eq!(fields[8], "21:100");
}

#[test]
fn rejects_invalid_statistic_code() {
    let dir = tempfile::tempdir().unwrap();
    let vcf = write_file(&dir, "chr21.vcf", VCF);
    let panel = write_file(&dir, "panel.csv", PANEL);
    let output = dir.path().join("results.tsv");

    Command::cargo_bin("introscan")
        .unwrap()
        .args([
            "--vcf",
            vcf.to_str().unwrap(),
            "--chr",
            "21",
            "--populations",
            panel.to_str().unwrap(),
            "--ref",
            "REF",
            "--tgt",
            "TGT",
            "--src",
            "SRC",
            "--stat",
            "U5",
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid statistic specification"));
}
