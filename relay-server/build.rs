use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=PACKAGE_VERSION");
    println!("cargo:rerun-if-env-changed=FILE_VERSION");

    let (package_version, file_version, build_info) = generate_version_info();

    println!("cargo:rustc-env=PACKAGE_VERSION={}", package_version);
    println!("cargo:rustc-env=FILE_VERSION={}", file_version);
    println!("cargo:rustc-env=BUILD_INFO={}", build_info);

    // Rerun if .git/HEAD changes
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs/heads");
}

fn generate_version_info() -> (String, String, String) {
    // Versions handed in by CI take precedence
    if let (Ok(pkg_ver), Ok(file_ver)) = (
        std::env::var("PACKAGE_VERSION"),
        std::env::var("FILE_VERSION"),
    ) {
        let build_info = format!("{}+ci", file_ver);
        return (pkg_ver, file_ver, build_info);
    }

    let base_version = git(&["describe", "--tags", "--abbrev=0", "--match", "v[0-9]*"])
        .map(|tag| tag.trim_start_matches('v').to_string())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    let commit_count: u32 = git(&["rev-list", "--count", "HEAD"])
        .and_then(|count| count.parse().ok())
        .unwrap_or(0);
    let commit_hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let dirty_suffix = if is_dirty() { "-dirty" } else { "" };

    let file_version = format!("{}.{}", base_version, commit_count);
    let build_info = format!(
        "{}+build.{}.{}{}",
        base_version, commit_count, commit_hash, dirty_suffix
    );

    (base_version, file_version, build_info)
}

/// Trimmed stdout of a successful git invocation
fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
}

fn is_dirty() -> bool {
    Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .map(|status| !status.success())
        .unwrap_or(false)
}
