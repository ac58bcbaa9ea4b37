//! udma-emu: run a user DMA scenario described in TOML

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use udma_emu::config::Config;
use udma_emu::device::dma::{
    CommandResult, Descriptor, DmaEngine, InsnChecker, MemoryType, Permissions, PmuCounter, Region2d, Transform,
};
use udma_emu::device::{DmaComplex, HostMemory, SharedMemory};

/// Upper bound on ticks spent waiting for one command.
const MAX_TICKS: u64 = 1_000_000;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Scenario {
    #[serde(default)]
    region: Vec<RegionDef>,
    #[serde(default)]
    fill: Vec<FillDef>,
    #[serde(default)]
    descriptor: Vec<DescriptorDef>,
    run: RunDef,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegionDef {
    name: String,
    base: u32,
    size: u32,
    #[serde(rename = "type", default = "default_region_type")]
    kind: String,
    #[serde(default = "default_perms")]
    perms: String,
}

fn default_region_type() -> String {
    "ddr".to_string()
}

fn default_perms() -> String {
    "rw".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FillDef {
    addr: u32,
    #[serde(default)]
    bytes: Vec<u8>,
    /// Length of an incrementing pattern starting at `seed`
    #[serde(default)]
    len: u32,
    #[serde(default)]
    seed: u8,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorDef {
    addr: u32,
    #[serde(default = "default_kind")]
    kind: String,
    src: u32,
    dst: u32,
    #[serde(default)]
    next: u32,
    #[serde(default)]
    length: u32,
    #[serde(default)]
    src_bypass: bool,
    #[serde(default)]
    dst_bypass: bool,
    #[serde(default)]
    order: bool,
    #[serde(default)]
    width: u16,
    #[serde(default)]
    height: u16,
    #[serde(default)]
    src_stride: u16,
    #[serde(default)]
    dst_stride: u16,
    #[serde(default)]
    transform: Option<String>,
}

fn default_kind() -> String {
    "linear".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunDef {
    #[serde(default)]
    engine: usize,
    start: u32,
    /// Optional precise pause point
    #[serde(default)]
    pause_at: Option<u32>,
    /// Regions to hexdump with --dump (all when empty)
    #[serde(default)]
    dump: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--sample-config") {
        print!("{}", Config::sample_config());
        return Ok(());
    }

    let mut dump = false;
    let mut path = None;
    for arg in &args[1..] {
        if arg == "--dump" {
            dump = true;
        } else if arg == "--help" || arg == "-h" {
            print_usage();
            return Ok(());
        } else if !arg.starts_with('-') {
            path = Some(arg.as_str());
        } else {
            bail!("unknown option {}", arg);
        }
    }

    let Some(path) = path else {
        print_usage();
        return Ok(());
    };

    let config = Config::get();
    config.validate().context("invalid configuration")?;

    let scenario = load_scenario(Path::new(path))?;
    println!("Loading: {}", path);
    println!();

    let memory = build_memory(&scenario)?;
    let mut complex = DmaComplex::new(config.num_engines(), memory, &config.engine_config())?;
    let engine = complex
        .engine_mut(scenario.run.engine)
        .with_context(|| format!("scenario runs engine {}", scenario.run.engine))?;

    run(engine, &scenario.run)?;
    print_summary(engine);

    if dump {
        print_dumps(complex.memory(), &scenario.run.dump);
    }

    Ok(())
}

fn print_usage() {
    println!("usage: udma-emu <scenario.toml> [--dump]");
    println!("       udma-emu --sample-config");
}

fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse_memory_type(kind: &str) -> anyhow::Result<MemoryType> {
    Ok(match kind.to_ascii_lowercase().as_str() {
        "ddr" => MemoryType::Ddr,
        "axi2" => MemoryType::Axi2,
        "ahb" => MemoryType::Ahb,
        "l2tcm" => MemoryType::L2Tcm,
        "vtcm" => MemoryType::Vtcm,
        "l2vic" => MemoryType::L2Vic,
        "cccc" => MemoryType::InvalidCccc,
        "invalid" => MemoryType::InvalidDma,
        other => bail!("unknown region type '{}'", other),
    })
}

fn parse_perms(perms: &str) -> anyhow::Result<Permissions> {
    let mut out = Permissions::empty();
    for c in perms.chars() {
        out |= match c {
            'u' => Permissions::USER,
            'r' => Permissions::READ,
            'w' => Permissions::WRITE,
            'x' => Permissions::EXECUTE,
            other => bail!("unknown permission '{}'", other),
        };
    }
    Ok(out)
}

fn parse_transform(name: &str) -> anyhow::Result<Transform> {
    Ok(match name.to_ascii_lowercase().replace('_', "-").as_str() {
        "none" => Transform::None,
        "expand-upper" => Transform::ExpandUpper,
        "expand-lower" => Transform::ExpandLower,
        "compress-upper" => Transform::CompressUpper,
        "compress-lower" => Transform::CompressLower,
        "swap" => Transform::Swap,
        other => bail!("unknown transform '{}'", other),
    })
}

fn build_descriptor(def: &DescriptorDef) -> anyhow::Result<Descriptor> {
    let desc = match def.kind.as_str() {
        "linear" => Descriptor::linear(def.src, def.dst, def.length),
        "2d" => {
            let mut region = Region2d::new(def.width, def.height, def.src_stride, def.dst_stride);
            if let Some(name) = &def.transform {
                region = region.with_transform(parse_transform(name)?);
            }
            Descriptor::two_d(def.src, def.dst, region)
        }
        other => bail!("descriptor at 0x{:08x}: unknown kind '{}'", def.addr, other),
    };
    Ok(desc
        .with_next(def.next)
        .with_bypass(def.src_bypass, def.dst_bypass)
        .with_order(def.order))
}

fn build_memory(scenario: &Scenario) -> anyhow::Result<HostMemory> {
    let mut mem = HostMemory::new();

    for region in &scenario.region {
        let mem_type = parse_memory_type(&region.kind)?;
        let perms = parse_perms(&region.perms)?;
        mem.map_region(region.name.clone(), region.base, region.size, mem_type, perms)
            .with_context(|| format!("mapping region '{}'", region.name))?;
    }

    for fill in &scenario.fill {
        let addr = u64::from(fill.addr);
        if fill.bytes.is_empty() {
            let pattern: Vec<u8> = (0..fill.len).map(|i| fill.seed.wrapping_add(i as u8)).collect();
            mem.write_bytes(addr, &pattern);
        } else {
            mem.write_bytes(addr, &fill.bytes);
        }
    }

    for def in &scenario.descriptor {
        let desc = build_descriptor(def)?;
        log::debug!("descriptor 0x{:08x}: {}", def.addr, desc);
        mem.write_bytes(u64::from(def.addr), &desc.to_bytes());
    }

    Ok(mem)
}

/// Issue a command until it executes, then block on whatever it returns.
fn issue(
    engine: &mut DmaEngine<SharedMemory>,
    mut command: impl FnMut(&mut DmaEngine<SharedMemory>) -> CommandResult,
) -> anyhow::Result<CommandResult> {
    for _ in 0..MAX_TICKS {
        let result = command(engine);
        match result.checker {
            Some(InsnChecker::Latency) => block_on(engine, InsnChecker::Latency)?,
            Some(checker) => {
                block_on(engine, checker)?;
                return Ok(result);
            }
            None => return Ok(result),
        }
    }
    bail!("command never executed")
}

fn block_on(engine: &mut DmaEngine<SharedMemory>, checker: InsnChecker) -> anyhow::Result<()> {
    for _ in 0..MAX_TICKS {
        if engine.check(checker) {
            return Ok(());
        }
        engine.adapter().lock().advance_pcycle(1);
        engine.tick(true);
    }
    bail!("DMA {}: {:?} still blocked after {} ticks", engine.num(), checker, MAX_TICKS)
}

fn run(engine: &mut DmaEngine<SharedMemory>, run: &RunDef) -> anyhow::Result<()> {
    if let Some(va) = run.pause_at {
        engine.target_descriptor(va, 0, 0);
    }

    issue(engine, |e| e.start(run.start))?;
    let waited = issue(engine, |e| e.wait())?;
    println!("dmwait: 0x{:08x}{}", waited.value, if waited.exception { " (exception)" } else { "" });

    if run.pause_at.is_some() {
        let paused = issue(engine, |e| e.pause())?;
        println!("dmpause: 0x{:08x}", paused.value);
    }

    let polled = issue(engine, |e| e.poll())?;
    println!("dmpoll: 0x{:08x}{}", polled.value, if polled.exception { " (exception)" } else { "" });
    Ok(())
}

fn print_summary(engine: &mut DmaEngine<SharedMemory>) {
    println!();
    println!("Engine");
    println!("======");
    println!("{}", engine);
    println!("DM0 0x{:08x}  DM2 0x{:08x}  DM4 0x{:08x}  DM5 0x{:08x}",
        engine.cfgrd(0), engine.cfgrd(2), engine.cfgrd(4), engine.cfgrd(5));

    let stats = engine.stats();
    println!("Descriptors done: {}", stats.descriptors);
    println!("Bytes read/written: {}/{}", stats.bytes_read, stats.bytes_written);
    println!("Chunks: {}", stats.chunks);
    println!("Exceptions: {}  Faults: {}", stats.exceptions, stats.faults);
    if let Some(reason) = engine.fault().reason {
        println!("First fault: {} at 0x{:08x}", reason, engine.fault().address);
    }

    println!();
    println!("Completions");
    println!("===========");
    for done in engine.take_completions() {
        println!("  [{:3}] 0x{:08x} {:?}{}", done.id, done.va, done.state, if done.paused { " (paused)" } else { "" });
    }

    println!();
    println!("PMU");
    println!("===");
    let mem = engine.adapter().lock();
    for (counter, value) in mem.counters() {
        println!("  {:<24} {}", counter.name(), value);
    }
    if mem.counter(PmuCounter::DescDone) == 0 {
        println!("  (no descriptor completed)");
    }
}

fn print_dumps(memory: &SharedMemory, names: &[String]) {
    let mem = memory.lock();
    for region in mem.regions() {
        if !names.is_empty() && !names.contains(&region.name) {
            continue;
        }
        println!();
        println!("{} (0x{:08x}, {} bytes, {:?})", region.name, region.base, region.size, region.mem_type);
        print!("{}", mem.hexdump(u64::from(region.base), region.size.min(0x200) as usize));
        println!("  DMA reads: {}  DMA writes: {}", region.dma_reads, region.dma_writes);
    }
}
