/* Layout code to appearance lookup.
 *
 * Pure functions over the loaded configuration. An exact layout code wins
 * over the "*" entry; first match in file order. */

use crate::color::{HsvColor, RgbColor};
use crate::config::{ColorMapping, Config, FlagMapping, Lighting, WILDCARD_LAYOUT};
use crate::driver::LedUpdate;

fn lookup<'a, T>(entries: &'a [T], layout: &str, key: impl Fn(&T) -> &str) -> Option<&'a T> {
    entries
        .iter()
        .find(|e| key(e) == layout)
        .or_else(|| entries.iter().find(|e| key(e) == WILDCARD_LAYOUT))
}

/* Mono color for `layout`, or `None` when neither an exact nor a wildcard
 * entry exists. Always `None` in draw mode. */
pub fn color_for(config: &Config, layout: &str) -> Option<RgbColor> {
    let colors: &[ColorMapping] = match &config.lighting {
        Lighting::StockMono { colors } | Lighting::VialMono { colors } => colors,
        Lighting::VialDraw { .. } => return None,
    };
    lookup(colors, layout, |m| m.layout.as_str()).map(|m| m.color)
}

/* Flag for `layout`. Always `None` in mono mode. */
pub fn flag_for<'a>(config: &'a Config, layout: &str) -> Option<&'a FlagMapping> {
    match &config.lighting {
        Lighting::VialDraw { drawings, .. } => lookup(drawings, layout, |f| f.layout.as_str()),
        _ => None,
    }
}

/* Paint a flag onto `led_count` LEDs.
 *
 * Returns one update per LED in ascending index order, dark unless a stripe
 * covers it. Stripes are painted in order so later ones overwrite earlier
 * ones. A stripe with explicit `leds` ignores its `rows`. Indices at or past
 * `led_count` and unknown rows are skipped. */
pub fn expand_flag(flag: &FlagMapping, rows: &[Vec<u16>], led_count: u16) -> Vec<LedUpdate> {
    let mut colors = vec![HsvColor::OFF; usize::from(led_count)];

    for stripe in &flag.stripes {
        let hsv = stripe.color.to_hsv();
        let mut paint = |index: u16| {
            if let Some(slot) = colors.get_mut(usize::from(index)) {
                *slot = hsv;
            }
        };

        if !stripe.leds.is_empty() {
            stripe.leds.iter().copied().for_each(&mut paint);
        } else {
            stripe
                .rows
                .iter()
                .filter_map(|&row| rows.get(row))
                .flatten()
                .copied()
                .for_each(&mut paint);
        }
    }

    (0..led_count)
        .zip(colors)
        .map(|(index, color)| LedUpdate { index, color })
        .collect()
}
