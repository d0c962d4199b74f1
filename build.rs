use std::fs::File;
use std::io::BufWriter;
use std::io::{Read, Write};

/// Everything that changes the lua a given block tree compiles to.
const CODEGEN_SOURCES: &[&str] = &[
    "src/ast.rs",
    "src/value.rs",
    "src/board.rs",
    "src/compiler.rs",
    "src/scheduler.rs",
];

fn main() {
    let mut context = md5::Context::new();
    let mut buf = Vec::with_capacity(4096);
    for &path in CODEGEN_SOURCES {
        println!("cargo:rerun-if-changed={path}");
        buf.clear();
        File::open(path).and_then(|mut f| f.read_to_end(&mut buf)).unwrap_or_else(|e| panic!("failed to read {path}: {e}"));
        context.consume(path.as_bytes());
        context.consume(&buf);
    }
    let hash = u128::from_be_bytes(context.compute().0);

    let out_dir = std::env::var("OUT_DIR").expect("cargo sets OUT_DIR");
    let mut f = BufWriter::new(File::create(format!("{out_dir}/meta.rs")).expect("failed to create meta.rs"));
    writeln!(f, "pub const FINGERPRINT: u128 = 0x{hash:0>32x}u128;").expect("failed to write meta.rs");
}
