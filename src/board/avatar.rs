//! Generated initials avatars.
//!
//! Every email maps to a fixed gradient hue, so a user's avatar looks the
//! same everywhere without storing an image.

pub const AVATAR_SIZE: u32 = 40;

/// Hue in `0..360` derived from the email's UTF-16 code units.
pub fn avatar_hue(email: &str) -> u32 {
    let hash = email
        .encode_utf16()
        .fold(0i32, |hash, unit| i32::from(unit).wrapping_add((hash << 5).wrapping_sub(hash)));
    hash.unsigned_abs() % 360
}

/// Upper-cased first character of `email`, or `?` when it is empty.
pub fn avatar_initial(email: &str) -> String {
    match email.chars().next() {
        Some(c) => c.to_uppercase().collect(),
        None => "?".to_string(),
    }
}

pub fn avatar_svg(email: &str, size: u32) -> String {
    let hue = avatar_hue(email);
    let end_hue = (hue + 40) % 360;
    let half = f64::from(size) / 2.0;
    let font_size = f64::from(size) * 0.4;
    let initial = escape_xml(&avatar_initial(email));
    format!(
        r#"<svg width="{size}" height="{size}" viewBox="0 0 {size} {size}" xmlns="http://www.w3.org/2000/svg">
  <defs>
    <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
      <stop offset="0%" style="stop-color:hsl({hue}, 70%, 60%);stop-opacity:1" />
      <stop offset="100%" style="stop-color:hsl({end_hue}, 70%, 70%);stop-opacity:1" />
    </linearGradient>
  </defs>
  <circle cx="{half}" cy="{half}" r="{half}" fill="url(#grad)" />
  <text x="{half}" y="{text_y}" text-anchor="middle" font-family="system-ui, -apple-system, sans-serif" font-size="{font_size}" font-weight="600" fill="white">{initial}</text>
</svg>"#,
        text_y = half + 6.0,
    )
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
