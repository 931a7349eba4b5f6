// Embed git hash for --version. No git = "unknown".
fn main() {
    let mut hash = String::from("unknown");
    if let Ok(output) = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    {
        if output.status.success() {
            if let Ok(s) = String::from_utf8(output.stdout) {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    hash = trimmed.to_owned();
                }
            }
        }
    }
    println!("cargo:rustc-env=TTYVID_GIT_HASH={hash}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
