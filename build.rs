fn main() {
    // CoreBluetooth refuses to scan from a binary without an Info.plist that
    // carries NSBluetoothAlwaysUsageDescription.  A CLI has no bundle, so the
    // plist is linked into the __TEXT,__info_plist section instead.
    //
    // CARGO_CFG_TARGET_OS is the target, not the host, so cross builds work.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }
    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR unset; Info.plist not embedded");
        return;
    };
    let plist = format!("{dir}/Info.plist");
    for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
        println!("cargo:rustc-link-arg-bins={arg}");
    }
    println!("cargo:rerun-if-changed=Info.plist");
}
