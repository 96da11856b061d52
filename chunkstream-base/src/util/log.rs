/// Provides the recommended log filter for programs which want to see the pipeline's
/// lifecycle messages without per-frame noise from the rest of their dependency tree.
///
/// The guiding principle for this filtering is that at [`log::Level::Debug`] or lower level,
/// there should be no messages produced every frame unless something is wrong.
/// Per-chunk chatter from the pipeline itself is logged at [`log::Level::Trace`] and is
/// only let through when explicitly requested at that level.
#[allow(clippy::missing_inline_in_public_items)]
pub fn standard_filter(metadata: &log::Metadata<'_>) -> bool {
    let target = metadata.target();

    if target.starts_with("chunkstream") {
        return true;
    }

    !(target.starts_with("tracing::span")  // logs every single tracing span
        || target.starts_with("wgpu") // noisy
        || target.starts_with("naga::") // noisy
        || target.starts_with("winit::") // noisy at Debug level
        || (target.starts_with("flume") && metadata.level() >= log::Level::Debug))
}
