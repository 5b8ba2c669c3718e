// LuaJIT bytecode decompiler
// Reads 2.0/2.1 binary dumps and reconstructs Lua 5.1 source text.

#[cfg(test)]
mod test;

pub mod ast;
pub mod dis;
pub mod error;
pub mod lua;
pub mod opcode;
pub mod rawdump;

use std::fs;
use std::path::Path;

pub use ast::nodes::FunctionDefinition;
pub use error::{DecompileError, DecompileResult};
pub use opcode::{BytecodeVersion, VersionedContext};
pub use rawdump::{Header, Prototype};

use log::debug;

/// Run the full reconstruction pipeline on a parsed dump.
///
/// Each stage is a tree-to-tree rewrite on one owned AST; the validator
/// gates the stage boundaries.
pub fn decompile(
    ctx: &VersionedContext,
    header: &Header,
    prototype: &Prototype,
) -> DecompileResult<FunctionDefinition> {
    debug!("building AST ({} instructions)", prototype.instructions.len());
    let mut chunk = ast::builder::build(ctx, header, prototype)?;
    ast::validator::validate(&chunk, true)?;

    ast::mutator::pre_pass(&mut chunk);
    ast::validator::validate(&chunk, true)?;

    ast::locals::mark_locals(&mut chunk, false);
    ast::slotworks::eliminate_temporary(&mut chunk, true);
    debug!("unwarping");
    ast::unwarper::unwarp(&mut chunk)?;
    // Structuring (and/or folds in particular) exposes new single-use
    // temporaries.
    ast::slotworks::eliminate_structured(&mut chunk);

    ast::locals::mark_local_definitions(&mut chunk);
    ast::mutator::primary_pass(&mut chunk);
    ast::validator::validate(&chunk, false)?;

    // Second round: unwarping introduced loop variables and scopes the
    // first locals pass could not see.
    ast::locals::mark_locals(&mut chunk, true);
    ast::locals::mark_local_definitions(&mut chunk);
    Ok(chunk)
}

/// Decompile an in-memory dump into Lua source text.
pub fn decompile_buffer(buf: &[u8]) -> DecompileResult<String> {
    let (header, ctx, prototype) = rawdump::parse_dump(buf)?;
    let chunk = decompile(&ctx, &header, &prototype)?;
    let mut out = String::new();
    lua::write_chunk(&mut out, &chunk)
        .map_err(|e| DecompileError::structural(format!("write failed: {e}")))?;
    Ok(out)
}

/// Decompile one file on disk into another.
pub fn decompile_file(path_in: &Path, path_out: &Path) -> DecompileResult<()> {
    debug!("process file {} -> {}", path_in.display(), path_out.display());
    let data = fs::read(path_in)?;
    let text = decompile_buffer(&data)?;
    fs::write(path_out, text)?;
    Ok(())
}

/// Produce a pseudo-assembly listing instead of source.
pub fn listing_buffer(buf: &[u8]) -> DecompileResult<String> {
    let (header, ctx, prototype) = rawdump::parse_dump(buf)?;
    let mut out = String::new();
    dis::write_listing(&mut out, &ctx, &header, &prototype)
        .map_err(|e| DecompileError::structural(format!("write failed: {e}")))?;
    Ok(out)
}
