// SPDX-License-Identifier: Apache-2.0 OR MIT
fn main() {
    // `cargo tarpaulin` builds with `--cfg tarpaulin`; the CLI tests that spawn
    // the ringlogd binary are skipped under it. Declare the cfg so ordinary
    // builds don't warn about an unexpected name.
    println!("cargo:rustc-check-cfg=cfg(tarpaulin)");
}
