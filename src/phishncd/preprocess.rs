use crate::phishncd::error::Result;
use crate::phishncd::similarity::{ncd, SimilarityScore};
use crate::phishncd::structure::{dom_similarity, link_similarity, MarkupFeatures};
use crate::phishncd::util::url_host;
use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use scraper::node::Element;
use scraper::{Html, Node};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;

pub const DEFAULT_IMAGE_SIZE: u32 = 256;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];
// `script` elements are removed before links are read.
const LINK_BEARING_TAGS: [&str; 3] = ["a", "img", "link"];
const STRIPPED_TAGS: [&str; 2] = ["script", "style"];

/// How raw artifacts of one classification kind become comparable bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    /// Grayscale, `size`x`size`, PNG encoded.
    Image { size: u32 },
    Markup,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image { .. } => "image",
            Self::Markup => "markup",
        }
    }

    /// Whether a corpus file should be considered for this kind.
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            Self::Image { .. } => path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    IMAGE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                })
                .unwrap_or(false),
            Self::Markup => true,
        }
    }

    pub fn canonicalize(&self, raw: &[u8]) -> Result<Artifact> {
        match self {
            Self::Image { size } => Ok(Artifact {
                canonical: canonicalize_image(raw, *size)?,
                features: None,
            }),
            Self::Markup => Ok(canonicalize_markup(String::from_utf8_lossy(raw).as_ref())),
        }
    }
}

/// An artifact in canonical form, ready for distance computation.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub canonical: Vec<u8>,
    pub features: Option<MarkupFeatures>,
}

impl Artifact {
    pub fn compare(&self, reference: &Artifact) -> SimilarityScore {
        let distance = ncd(self.canonical.as_slice(), reference.canonical.as_slice());
        match (&self.features, &reference.features) {
            (Some(query), Some(candidate)) => SimilarityScore {
                ncd: distance,
                dom: Some(dom_similarity(query, candidate)),
                links: Some(link_similarity(query, candidate)),
            },
            _ => SimilarityScore {
                ncd: distance,
                dom: None,
                links: None,
            },
        }
    }
}

pub fn canonicalize_image(raw: &[u8], size: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(raw)?;
    let luma = decoded.to_luma8();
    let resized = image::imageops::resize(&luma, size, size, FilterType::CatmullRom);
    let mut canonical = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(resized).write_to(&mut canonical, ImageFormat::Png)?;
    Ok(canonical.into_inner())
}

/// Visible text plus structural features of a markup document.
///
/// Parsing never fails; malformed markup is repaired by the HTML5 tree
/// builder. Text inside `script`/`style` and comments is dropped. Tag names
/// come from the start tags written in the source, not from the repaired
/// tree, which always holds `html`, `head` and `body`.
pub fn canonicalize_markup(source: &str) -> Artifact {
    let document = Html::parse_document(source);
    let mut words: Vec<&str> = Vec::new();
    let mut features = MarkupFeatures {
        tags: source_tags(source),
        hosts: BTreeSet::new(),
    };

    for node in document.tree.root().descendants() {
        let stripped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| STRIPPED_TAGS.contains(&element.name()))
        });
        match node.value() {
            Node::Text(text) if !stripped => {
                words.extend(text.text.split_whitespace());
            }
            Node::Element(element) if !stripped => {
                if LINK_BEARING_TAGS.contains(&element.name()) {
                    if let Some(host) = link_target(element).and_then(url_host) {
                        features.hosts.insert(host);
                    }
                }
            }
            _ => {}
        }
    }

    Artifact {
        canonical: words.join(" ").into_bytes(),
        features: Some(features),
    }
}

/// Element names opened in the source outside `script`/`style` content.
fn source_tags(source: &str) -> BTreeSet<String> {
    let mut input = BufferQueue::default();
    input.push_back(StrTendril::from_slice(source));
    let mut tokenizer = Tokenizer::new(StartTagCollector::default(), TokenizerOpts::default());
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink.tags
}

#[derive(Default)]
struct StartTagCollector {
    tags: BTreeSet<String>,
}

impl TokenSink for StartTagCollector {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        let Token::TagToken(Tag {
            kind: TagKind::StartTag,
            name,
            ..
        }) = token
        else {
            return TokenSinkResult::Continue;
        };
        // Script and style bodies are raw text; nothing inside them is a tag.
        match &*name {
            "script" => TokenSinkResult::RawData(RawKind::ScriptData),
            "style" => TokenSinkResult::RawData(RawKind::Rawtext),
            other => {
                self.tags.insert(other.to_owned());
                TokenSinkResult::Continue
            }
        }
    }
}

fn link_target(element: &Element) -> Option<&str> {
    element
        .attr("href")
        .filter(|value| !value.is_empty())
        .or_else(|| element.attr("src"))
        .filter(|value| !value.is_empty())
}
