use std::env;
use std::process::Command;

/// Version reported by `rapi --version`, in order of preference: an explicit
/// `RAPI_VERSION` from the build environment, the nearest git tag, then the
/// placeholder version from Cargo.toml.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-env-changed=RAPI_VERSION");

    let version = env::var("RAPI_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(git_version)
        .unwrap_or_else(|| env::var("CARGO_PKG_VERSION").unwrap_or_default());

    println!("cargo:rustc-env=RAPI_VERSION={}", version);
}

/// `git describe` output as a semver-ish string: "v1.2.0-3-gabc123-dirty"
/// becomes "1.2.0-3-gabc123+dirty".
fn git_version() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;

    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    let described = described.strip_prefix('v').unwrap_or(described);
    if described.is_empty() {
        return None;
    }

    Some(match described.strip_suffix("-dirty") {
        Some(clean) => format!("{}+dirty", clean),
        None => described.to_string(),
    })
}
