use std::process::Command;

/// Short sha of HEAD, or `GIT_SHA` when building outside a checkout
fn git_sha() -> Option<String> {
    let from_git = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());
    from_git
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("GIT_SHA").ok().filter(|s| !s.is_empty()))
}

fn main() {
    let base = env!("CARGO_PKG_VERSION");
    let nightly = std::env::var("LAMBDA_NIGHTLY")
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let version = if nightly {
        match git_sha() {
            Some(sha) => format!("{}-nightly+{}", base, sha),
            None => format!("{}-nightly", base),
        }
    } else {
        base.to_string()
    };

    println!("cargo:rustc-env=APP_VERSION={}", version);
    println!("cargo:rerun-if-env-changed=LAMBDA_NIGHTLY");
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
