use ferret_core::bytecode::{
    Function, FunctionBuilder, Module, ModuleBuilder, ModuleError, ParamKind,
};
use ferret_core::config::{
    ArtifactSettings, FerretConfig, InterpSettings, SessionSettings, TargetSettings,
};
use ferret_core::loader::ModuleLoader;
use ferret_core::session::Session;

use std::path::PathBuf;

/// The bundled fuzz target: a markup well-formedness checker that walks the
/// text once, balancing `<tag>` against `</tag>` and skipping `<!...>`
/// declarations. `UnclosedTag` fires when openings outlive the input,
/// `StrayCloseTag` when a closing shows up at depth zero.
fn scanner_function(module: &mut ModuleBuilder) -> Result<Function, ModuleError> {
    let unclosed = module.intern("UnclosedTag");
    let stray = module.intern("StrayCloseTag");

    // locals: 0 = text, 1 = idx, 2 = depth, 3 = len
    let mut f = FunctionBuilder::new("parse", &[ParamKind::Markup]);
    f.extra_locals(3);
    let loop_top = f.new_label();
    let at_char = f.new_label();
    let advance = f.new_label();
    let open_tag = f.new_label();
    let peek = f.new_label();
    let close_tag = f.new_label();
    let stray_close = f.new_label();
    let at_end = f.new_label();
    let left_open = f.new_label();

    f.line(1)
        .push_int(0)
        .store(1)
        .push_int(0)
        .store(2)
        .load(0)
        .str_len()
        .store(3);
    f.bind(loop_top);
    f.line(2).load(1).load(3).lt().jump_if(at_char).jump(at_end);
    f.bind(at_char);
    f.line(3)
        .load(0)
        .load(1)
        .char_at()
        .push_int('<' as i64)
        .eq()
        .jump_if(open_tag);
    f.bind(advance);
    f.line(4).load(1).push_int(1).add().store(1).jump(loop_top);
    f.bind(open_tag);
    f.line(5).load(1).push_int(1).add().load(3).lt().jump_if(peek);
    f.line(6).raise(unclosed);
    f.bind(peek);
    f.line(7)
        .load(0)
        .load(1)
        .push_int(1)
        .add()
        .char_at()
        .push_int('/' as i64)
        .eq()
        .jump_if(close_tag);
    f.line(8)
        .load(0)
        .load(1)
        .push_int(1)
        .add()
        .char_at()
        .push_int('!' as i64)
        .eq()
        .jump_if(advance);
    f.line(9).load(2).push_int(1).add().store(2).jump(advance);
    f.bind(close_tag);
    f.line(10).load(2).push_int(0).eq().jump_if(stray_close);
    f.line(11).load(2).push_int(1).sub().store(2).jump(advance);
    f.bind(stray_close);
    f.line(12).raise(stray);
    f.bind(at_end);
    f.line(13).load(2).push_int(0).gt().jump_if(left_open);
    f.line(14).load(2).ret();
    f.bind(left_open);
    f.line(15).raise(unclosed);
    f.finish()
}

fn pages_module() -> Result<Module, ModuleError> {
    let mut builder = ModuleBuilder::new("demo.pages");
    let parse = scanner_function(&mut builder)?;
    builder.function(parse);
    Ok(builder.finish())
}

fn main() -> Result<(), anyhow::Error> {
    let mut loader = ModuleLoader::new(vec![], "demo");
    loader.register(pages_module()?)?;

    let config = FerretConfig {
        target: TargetSettings {
            module: "demo.pages".to_string(),
            function: "parse(markup)".to_string(),
        },
        search_paths: vec![],
        session: SessionSettings {
            timeout_secs: 10,
            seed: None,
            max_iterations: Some(50_000),
            ..SessionSettings::default()
        },
        interp: InterpSettings::default(),
        artifacts: ArtifactSettings {
            dir: PathBuf::from("ferret-artifacts"),
            report_json: None,
        },
    };

    let mut session = Session::with_loader(config, loader)?;
    println!(
        "Fuzzing demo.pages::parse(markup) with seed {}...",
        session.seed()
    );
    let report = session.run()?;

    println!("Seeds found: {}", report.corpus_size);
    println!("Faults found: {}", report.fault_kinds.len());
    println!("Time elapsed: {} ms", report.elapsed_ms);
    Ok(())
}
