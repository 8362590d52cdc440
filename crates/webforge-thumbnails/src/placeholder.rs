//! Final-failure fallback: a generated SVG placeholder rather than a broken
//! image link.

const MAX_TITLE_LEN: usize = 40;

pub fn svg_placeholder(page_title: &str, background_color: &str, size: (u32, u32)) -> Vec<u8> {
    let title: String = page_title.chars().take(MAX_TITLE_LEN).collect();
    let escaped = title
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let (w, h) = size;
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
  <rect width="{w}" height="{h}" fill="{background_color}" />
  <text x="50%" y="50%" dominant-baseline="middle" text-anchor="middle" fill="#ffffff" font-family="sans-serif" font-size="24">{escaped}</text>
</svg>"#
    )
    .into_bytes()
}
