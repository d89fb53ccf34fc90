fn main() {
    #[cfg(feature = "ps6000")]
    ps6000::generate();
}

#[cfg(feature = "ps6000")]
mod ps6000 {
    use std::{env, path::PathBuf};

    const DEFAULT_SDK_DIR: &str = "/opt/picoscope";

    pub fn generate() {
        println!("cargo:rerun-if-env-changed=PICOSDK_DIR");
        let sdk = env::var("PICOSDK_DIR").unwrap_or_else(|_| DEFAULT_SDK_DIR.to_owned());
        let include = format!("{sdk}/include");

        println!("cargo:rustc-link-search=native={sdk}/lib");
        println!("cargo:rustc-link-lib=dylib=ps6000");

        let bindings = bindgen::Builder::default()
            .header(format!("{include}/libps6000/ps6000Api.h"))
            .clang_arg(format!("-I{include}"))
            .clang_arg(format!("-I{include}/libps6000"))
            .allowlist_function("ps6000.*")
            .allowlist_type("PS6000_.*|PICO_.*")
            .allowlist_var("PICO_.*|PS6000_.*")
            .prepend_enum_name(false)
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .generate()
            .expect("unable to generate ps6000 bindings");

        let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
        bindings
            .write_to_file(out.join("bindings.rs"))
            .expect("couldn't write ps6000 bindings");
    }
}
