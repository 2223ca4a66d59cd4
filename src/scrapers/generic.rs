//! Card-based extraction for shops without a known platform

use scraper::ElementRef;

use super::{AdapterContext, Seen, card_item};
use crate::classifier::{DOCUMENT_ROOT, is_card_shaped};
use crate::models::DraftItem;
use crate::normalize::resolve_url;
use crate::scraper::compile;

/// Levels above an anchor searched for its card.
const MAX_CARD_DEPTH: usize = 6;

/// Cards below the located root first, then any product-path anchor that
/// sits inside a card-shaped block.
pub(crate) fn extract(ctx: &AdapterContext<'_>, limit: usize) -> Vec<DraftItem> {
    let mut seen = Seen::default();
    let mut items = Vec::new();
    let Some(anchors) = compile("a[href]") else {
        return items;
    };

    if ctx.root_selector != DOCUMENT_ROOT
        && let Some(root) = compile(ctx.root_selector)
    {
        for card in ctx.page.document.select(&root) {
            if items.len() >= limit {
                return items;
            }

            let links: Vec<(ElementRef<'_>, String)> = card
                .select(&anchors)
                .filter_map(|a| {
                    let url = resolve_url(&ctx.page.base, a.value().attr("href")?)?;
                    (!ctx.rules.is_generic(&url) && !ctx.rules.is_action(&url)).then_some((a, url))
                })
                .collect();
            let Some((anchor, url)) = links
                .iter()
                .find(|(_, url)| ctx.rules.is_product_path(url))
                .or_else(|| links.first())
            else {
                continue;
            };

            if seen.first(url) {
                items.push(card_item(ctx, &card, Some(anchor), url.clone()));
            }
        }
    }

    for anchor in ctx.page.document.select(&anchors) {
        if items.len() >= limit {
            break;
        }

        let Some(url) = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_url(&ctx.page.base, href))
        else {
            continue;
        };
        if !ctx.rules.is_product_path(&url) || ctx.rules.is_action(&url) {
            continue;
        }
        let Some(card) = card_of(&anchor) else {
            continue;
        };

        if seen.first(&url) {
            items.push(card_item(ctx, &card, Some(&anchor), url));
        }
    }

    items
}

/// Closest card-shaped ancestor, or the anchor itself when it is the card.
fn card_of<'a>(anchor: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    anchor
        .ancestors()
        .take(MAX_CARD_DEPTH)
        .filter_map(ElementRef::wrap)
        .find(|el| is_card_shaped(el))
        .or_else(|| is_card_shaped(anchor).then_some(*anchor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WordLists;
    use crate::identifiers::IdentifierExtractor;
    use crate::models::PageSample;
    use crate::normalize::LinkRules;
    use crate::scraper::Page;

    fn run(markup: &str, root_selector: &str) -> Vec<DraftItem> {
        let sample = PageSample::new("https://garden.test/category/tools", markup);
        let page = Page::parse(&sample).unwrap();
        let words = WordLists::default();
        let rules = LinkRules::new(&words);
        let identifiers = IdentifierExtractor::new(&words);
        let ctx = AdapterContext {
            page: &page,
            rules: &rules,
            identifiers: &identifiers,
            root_selector,
        };
        extract(&ctx, 100)
    }

    #[test]
    fn root_cards_use_their_product_link() {
        let markup = r#"<div class="grid">
            <div><a href="/wishlist/add/1">Remember</a><a href="/tools/spade"><span>Spade</span></a><b>12,00 €</b></div>
            <div><a href="/tools/rake">Rake</a></div>
        </div>"#;

        let items = run(markup, ".grid > div");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].detail_url, "https://garden.test/tools/spade");
        assert_eq!(items[0].title, "Spade");
        assert_eq!(items[0].price_text.as_deref(), Some("12.00"));
        assert_eq!(items[1].title, "Rake");
    }

    #[test]
    fn product_anchors_need_a_card() {
        let markup = r#"<body>
            <p><a href="/product/loose-link">Loose</a></p>
            <article><a href="/product/hoe" title="Garden hoe"><img src="/i/hoe.webp"></a></article>
        </body>"#;

        let items = run(markup, DOCUMENT_ROOT);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Garden hoe");
        assert_eq!(items[0].image_url.as_deref(), Some("https://garden.test/i/hoe.webp"));
    }
}
