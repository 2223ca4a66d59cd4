//! Same-host anchor sweep used when no other adapter finds anything

use url::Url;

use super::{AdapterContext, Seen};
use crate::models::DraftItem;
use crate::normalize::{image_source, normalize_image, resolve_url, same_url};
use crate::scraper::{compile, element_text};

/// Every same-site anchor that is neither site furniture nor an item action.
pub(crate) fn extract(ctx: &AdapterContext<'_>, limit: usize) -> Vec<DraftItem> {
    let (Some(anchors), Some(images)) = (compile("a[href]"), compile("img")) else {
        return Vec::new();
    };
    let host = ctx.page.base.host_str();
    let mut seen = Seen::default();

    ctx.page
        .document
        .select(&anchors)
        .filter_map(|anchor| {
            let url = resolve_url(&ctx.page.base, anchor.value().attr("href")?)?;
            if Url::parse(&url).ok()?.host_str() != host
                || ctx.rules.is_generic(&url)
                || ctx.rules.is_action(&url)
                || same_url(&url, &ctx.page.sample.url)
            {
                return None;
            }

            let image = anchor.select(&images).next();
            let title = anchor
                .value()
                .attr("title")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .or_else(|| Some(element_text(&anchor)).filter(|t| !t.is_empty()))
                .or_else(|| {
                    image
                        .and_then(|img| img.value().attr("alt"))
                        .map(str::trim)
                        .filter(|alt| !alt.is_empty())
                        .map(str::to_string)
                })?;

            seen.first(&url).then(|| DraftItem {
                title,
                image_url: image
                    .and_then(|img| image_source(&img))
                    .and_then(|src| normalize_image(&ctx.page.base, &src)),
                detail_url: url,
                ..DraftItem::default()
            })
        })
        .take(limit)
        .collect()
}
