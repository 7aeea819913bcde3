use rustc_version::{Channel, version_meta};

fn has_cfg(name: &str) -> bool {
    std::env::var_os(format!("CARGO_CFG_{}", name.to_uppercase())).is_some()
}

fn cfg(name: &str) -> String {
    std::env::var(format!("CARGO_CFG_{}", name.to_uppercase())).unwrap_or_default()
}

fn make_overridable_cfg(name: &str, logic: impl FnOnce() -> &'static str) -> String {
    let env_name = format!("THORIUM_{}", name.to_uppercase());
    println!("cargo::rerun-if-env-changed={env_name}");
    let value = std::env::var(env_name).unwrap_or_else(|_| logic().to_string());
    println!("cargo::rustc-cfg={name}=\"{value}\"");
    value
}

/// Checks that the `catch_unwind` intrinsic still has the signature the Itanium backend expects.
fn has_catch_unwind_intrinsic() -> bool {
    autocfg::new()
        .probe_raw(
            r#"
        #![feature(core_intrinsics)]
        #![allow(internal_features)]
        extern crate core;
        fn do_call(_data: *mut u8) {}
        fn do_catch(_data: *mut u8, _ex: *mut u8) {}
        pub fn probe() -> i32 {
            unsafe { core::intrinsics::catch_unwind(do_call, core::ptr::null_mut(), do_catch) }
        }
    "#,
        )
        .is_ok()
}

fn main() {
    let is_nightly = version_meta().unwrap().channel == Channel::Nightly;

    make_overridable_cfg("thread_local", || {
        if is_nightly && has_cfg("target_thread_local") {
            "attribute"
        } else {
            "std"
        }
    });

    make_overridable_cfg("backend", || {
        let arch = cfg("target_arch");
        // ARM EHABI uses a differently shaped header, and Wasm targets have no Itanium unwinder
        // we can call into directly.
        let itanium_target = (has_cfg("unix")
            || (has_cfg("windows") && cfg("target_env") == "gnu"))
            && arch != "arm"
            && arch != "wasm32"
            && cfg("target_os") != "emscripten";
        if is_nightly && itanium_target && has_catch_unwind_intrinsic() {
            "itanium"
        } else {
            "panic"
        }
    });
}
