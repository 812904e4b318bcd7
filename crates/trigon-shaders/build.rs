//! Build script to compile GLSL shaders to SPIR-V.

use std::env;
use std::fs;
use std::path::Path;

use naga::back::spv;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let shader_dir = Path::new("shaders");

    // Rerun if shaders change
    println!("cargo:rerun-if-changed=shaders/");

    compile_shader(
        shader_dir.join("triangle.vert"),
        Path::new(&out_dir).join("triangle.vert.spv"),
        ShaderStage::Vertex,
    );
    compile_shader(
        shader_dir.join("triangle.frag"),
        Path::new(&out_dir).join("triangle.frag.spv"),
        ShaderStage::Fragment,
    );
}

fn compile_shader(input: impl AsRef<Path>, output: impl AsRef<Path>, stage: ShaderStage) {
    let input_path = input.as_ref();
    let output_path = output.as_ref();

    let source = fs::read_to_string(input_path)
        .unwrap_or_else(|e| panic!("Failed to read shader {input_path:?}: {e}"));

    let module = Frontend::default()
        .parse(&Options::from(stage), &source)
        .unwrap_or_else(|e| panic!("Failed to parse shader {input_path:?}: {e:?}"));

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .unwrap_or_else(|e| panic!("Shader {input_path:?} failed validation: {e:?}"));

    let words = spv::write_vec(&module, &info, &spv::Options::default(), None)
        .unwrap_or_else(|e| panic!("Failed to emit SPIR-V for {input_path:?}: {e}"));

    fs::write(output_path, bytemuck::cast_slice::<u32, u8>(&words))
        .unwrap_or_else(|e| panic!("Failed to write shader {output_path:?}: {e}"));
}
