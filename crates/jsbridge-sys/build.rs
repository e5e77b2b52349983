use std::env;
use std::fs;
use std::path::{Path, PathBuf};

// bun-webkit build from oven-sh/WebKit releases.
const BUN_WEBKIT_VERSION: &str = "aaf3f80b1cc701b412f8abfb7c7f413644a229ff";

fn main() {
    println!("cargo:rustc-check-cfg=cfg(has_bmalloc)");
    println!("cargo:rerun-if-env-changed=BUN_WEBKIT_VERSION");
    println!("cargo:rerun-if-env-changed=JSBRIDGE_WEBKIT_DIR");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();

    match target_os.as_str() {
        "macos" => link_system_framework(),
        "linux" | "windows" => {
            let webkit = match env::var("JSBRIDGE_WEBKIT_DIR") {
                Ok(dir) => PathBuf::from(dir),
                Err(_) => download_bun_webkit(&target_os, webkit_arch(&target_os, &target_arch)),
            };
            link_bun_webkit(&webkit, &target_os);
        }
        other => panic!("JavaScriptCore is not available for target os {other}"),
    }
}

fn link_system_framework() {
    println!("cargo:rustc-link-lib=framework=JavaScriptCore");

    if let Ok(output) = std::process::Command::new("xcrun")
        .args(["--show-sdk-path"])
        .output()
    {
        let sdk = String::from_utf8_lossy(&output.stdout);
        println!(
            "cargo:rustc-link-search=framework={}/System/Library/Frameworks",
            sdk.trim()
        );
    }
}

fn webkit_arch(os: &str, arch: &str) -> &'static str {
    match (os, arch) {
        (_, "x86_64") => "amd64",
        ("linux", "aarch64") => "arm64",
        _ => panic!("no bun-webkit build for {os}/{arch}"),
    }
}

fn download_bun_webkit(os: &str, arch: &str) -> PathBuf {
    let version = env::var("BUN_WEBKIT_VERSION").unwrap_or_else(|_| BUN_WEBKIT_VERSION.into());
    let target_dir = cache_dir().join(&version).join(format!("{os}-{arch}"));
    let marker = target_dir.join(".downloaded");
    if marker.exists() {
        return target_dir;
    }

    let url = format!(
        "https://github.com/oven-sh/WebKit/releases/download/autobuild-{version}/bun-webkit-{os}-{arch}.tar.gz"
    );
    println!("cargo:warning=downloading bun-webkit from {url}");

    fs::create_dir_all(&target_dir).expect("create bun-webkit cache directory");
    let response = ureq::get(&url)
        .call()
        .unwrap_or_else(|e| panic!("download of {url} failed: {e}"));

    // Stream straight into the decoder; the archive is several hundred MB.
    let gz = flate2::read::GzDecoder::new(response.into_body().into_reader());
    tar::Archive::new(gz)
        .unpack(&target_dir)
        .expect("unpack bun-webkit archive");
    fs::write(&marker, version).expect("write bun-webkit marker");

    target_dir
}

fn link_bun_webkit(webkit: &Path, os: &str) {
    let lib_dir = find_lib_dir(webkit);
    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=static=JavaScriptCore");
    println!("cargo:rustc-link-lib=static=WTF");

    // Some Windows builds fold bmalloc into WTF.
    if has_lib(&lib_dir, "bmalloc") {
        println!("cargo:rustc-link-lib=static=bmalloc");
        println!("cargo:rustc-cfg=has_bmalloc");
    }

    // Windows bun-webkit ships ICU as sicu*.
    let icu: &[&str] = if has_lib(&lib_dir, "sicudt") {
        &["sicudt", "sicuin", "sicuuc"]
    } else {
        &["icudata", "icui18n", "icuuc"]
    };
    for name in icu {
        println!("cargo:rustc-link-lib=static={name}");
    }

    match os {
        "linux" => {
            for name in ["stdc++", "atomic", "dl", "pthread", "m"] {
                println!("cargo:rustc-link-lib={name}");
            }
        }
        "windows" => {
            for name in [
                "winmm", "bcrypt", "ntdll", "userenv", "dbghelp", "crypt32", "wsock32", "ws2_32",
                "advapi32", "ole32", "oleaut32", "uuid", "shell32", "msvcrt",
            ] {
                println!("cargo:rustc-link-lib={name}");
            }
            println!("cargo:rustc-link-arg=/NODEFAULTLIB:libcmt");
        }
        _ => {}
    }

    let include = webkit.join("include");
    if include.exists() {
        println!("cargo:include={}", include.display());
    }
}

fn find_lib_dir(webkit: &Path) -> PathBuf {
    let direct = webkit.join("lib");
    if direct.exists() {
        return direct;
    }

    // The archive usually unpacks into a single `bun-webkit/` directory.
    fs::read_dir(webkit)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path().join("lib"))
        .find(|lib| lib.exists())
        .unwrap_or_else(|| webkit.to_path_buf())
}

fn has_lib(dir: &Path, name: &str) -> bool {
    let unix = format!("lib{name}");
    fs::read_dir(dir).into_iter().flatten().flatten().any(|entry| {
        let file = entry.file_name();
        let file = file.to_string_lossy();
        (file.starts_with(name) || file.starts_with(&unix))
            && (file.ends_with(".a") || file.ends_with(".lib"))
    })
}

fn cache_dir() -> PathBuf {
    let home = env::var("CARGO_HOME").map(PathBuf::from).or_else(|_| {
        env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".cargo"))
    });
    match home {
        Ok(home) => home.join("cache").join("bun-webkit"),
        Err(_) => PathBuf::from(env::var("OUT_DIR").unwrap()).join("bun-webkit-cache"),
    }
}
