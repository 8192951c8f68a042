//! Result Assembler
//!
//! Embeds layout metadata into the SVG as a script that posts it to the
//! embedding page, so an inline frame can be sized without another request.

use crate::metadata::LayoutMetadata;

pub const CLOSING_TAG: &str = "</svg>";

/// Script posting `depth|width|height|<own location>` to the parent window.
pub fn sizing_script(metadata: &LayoutMetadata) -> String {
    format!(
        "<script type=\"text/ecmascript\">if (window.parent && window.parent.postMessage) \
         {{ window.parent.postMessage(\"{}\" + window.location, \"*\"); }}</script>",
        metadata.message_prefix()
    )
}

/// Inserts the sizing script before the last closing tag. Without metadata,
/// or without a closing tag, the SVG is returned unchanged.
pub fn assemble(svg: String, metadata: Option<&LayoutMetadata>) -> String {
    let Some(metadata) = metadata else {
        return svg;
    };
    let Some(at) = svg.rfind(CLOSING_TAG) else {
        return svg;
    };

    let mut out = svg;
    out.insert_str(at, &sizing_script(metadata));
    out
}
