use datatest_stable as datatest;
use std::{
    fs,
    path::Path,
    process::{Command, Stdio},
};

fn run_case(path: &Path) -> datatest::Result<()> {
    let expected_path = path.with_extension("out");
    let expected = fs::read_to_string(&expected_path)
        .map_err(|e| format!("missing {}: {e}", expected_path.display()))?;

    let out = Command::new(assert_cmd::cargo::cargo_bin!("minirv"))
        .arg("--captures")
        .arg(path.canonicalize()?)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    if !out.status.success() {
        return Err(format!(
            "{} failed with {:?}\nstderr: {}",
            path.display(),
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        )
        .into());
    }
    if stdout.trim_end() != expected.trim_end() {
        return Err(format!(
            "\n=== mismatch for {} ===\n--- expected ---\n{}\n--- actual ---\n{}",
            path.display(),
            expected.trim_end(),
            stdout.trim_end()
        )
        .into());
    }
    Ok(())
}

datatest::harness! {
    { test = run_case, root = "./demos", pattern = r#"^.*\.asm$"# },
}
