//! Stamps the build date into `BUILD_DATE` for version output

fn main() {
    let date = chrono::Local::now().format("%Y-%m-%d");
    println!("cargo:rustc-env=BUILD_DATE={}", date);
}
