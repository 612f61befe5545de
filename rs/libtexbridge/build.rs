use std::env;
use std::fs;
use std::path::PathBuf;

const HEADER_NAME: &str = "texbridge";

fn main() {
	let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
	let target_dir = target_dir();

	// Generate C header into target/include/
	let include_dir = target_dir.join("include");
	fs::create_dir_all(&include_dir).expect("Failed to create include directory");
	let header = include_dir.join(format!("{}.h", HEADER_NAME));
	cbindgen::Builder::new()
		.with_crate(&crate_dir)
		.with_language(cbindgen::Language::C)
		.with_include_guard("TEXBRIDGE_H")
		.with_sys_include("stdbool.h")
		.generate()
		.expect("Unable to generate bindings")
		.write_to_file(&header);
}

fn target_dir() -> PathBuf {
	// OUT_DIR is always set by Cargo to something like:
	// target/{debug|release}/build/{crate}-{hash}/out
	// Go up 4 levels to get to target/
	PathBuf::from(env::var("OUT_DIR").unwrap())
		.parent() // build/{crate}-{hash}
		.and_then(|p| p.parent()) // build/
		.and_then(|p| p.parent()) // {debug|release}/
		.and_then(|p| p.parent()) // target/
		.expect("Failed to get target directory from OUT_DIR")
		.to_path_buf()
}
