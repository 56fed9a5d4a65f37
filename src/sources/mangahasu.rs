//! MangaHasu (<https://mangahasu.se>).
//!
//! Plain server-rendered HTML. Covers and pages are served from a CDN that
//! checks the referer, and the site is picky about request rates, hence the
//! long default wait time.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use super::{
    ChapterImages, ScrapedChapter, ScrapedEntry, ScrapedManga, Source, SourceCapabilities,
    SourceDescriptor, SourceError, SourceRuntime, SourceServices,
};
use crate::models::ChapterInfo;
use crate::utils::{Document, FetchRequest};

const HOST: &str = "https://mangahasu.se";

struct Selectors {
    search_item: Selector,
    search_name: Selector,
    search_link: Selector,
    search_release: Selector,
    cover: Selector,
    rank_item: Selector,
    rank_link: Selector,
    rank_name: Selector,
    title: Selector,
    info_cover: Selector,
    info_block: Selector,
    detail_row: Selector,
    genre_row: Selector,
    link: Selector,
    chapter_row: Selector,
    chapter_image: Selector,
    manga_backlink: Selector,
}

impl Selectors {
    fn new() -> Result<Self, SourceError> {
        Ok(Self {
            search_item: parse_selector("div.div_item")?,
            search_name: parse_selector("a.name-manga > h3")?,
            search_link: parse_selector("a.name-manga")?,
            search_release: parse_selector("a.name-chapter > span")?,
            cover: parse_selector(".wrapper_imgage img")?,
            rank_item: parse_selector(".list-rank li")?,
            rank_link: parse_selector(".info-manga > a")?,
            rank_name: parse_selector(".info-manga .name-manga")?,
            title: parse_selector(".info-title > h1")?,
            info_cover: parse_selector(".info-img > img")?,
            info_block: parse_selector(".content-info")?,
            detail_row: parse_selector(".info-c .detail_item > .row")?,
            genre_row: parse_selector(".info-c .detail_item.row-a")?,
            link: parse_selector("a")?,
            chapter_row: parse_selector("td.name > a")?,
            chapter_image: parse_selector(".img-chapter img")?,
            manga_backlink: parse_selector(r#"a[itemprop="url"][href*="html"]"#)?,
        })
    }
}

fn parse_selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css)
        .map_err(|e| SourceError::InvalidDescriptor(format!("selector `{}`: {}", css, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Lowercased link texts of the `rows` whose text contains `label`
fn labelled_links(html: &Html, rows: &Selector, links: &Selector, label: &str) -> Vec<String> {
    html.select(rows)
        .filter(|row| text_of(*row).contains(label))
        .flat_map(|row| row.select(links).map(text_of).collect::<Vec<_>>())
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// The MangaHasu source
pub struct MangaHasu {
    runtime: SourceRuntime,
    manga_page: Regex,
    chapter_page: Regex,
    chapter_label: Regex,
    chapter_word: Regex,
    selectors: Selectors,
}

impl std::fmt::Debug for MangaHasu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MangaHasu")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl MangaHasu {
    pub fn new(services: &SourceServices) -> Result<Self, SourceError> {
        let descriptor = SourceDescriptor::builder("mangahasu", "MangaHasu", HOST)
            .alt_host("https://www.mangahasu.se")
            .langs(&["en"])
            .capabilities(SourceCapabilities::all())
            .wait_time(Duration::from_millis(500))
            .icon("mangahasu.png")
            .meta(0.7, 0.5, 0.7)
            .build()?;

        let ci = |pattern: &str| RegexBuilder::new(pattern).case_insensitive(true).build();

        Ok(Self {
            runtime: SourceRuntime::new(descriptor, services),
            manga_page: ci(r"^/.*-\w{3,4}-p\d+\.html$")?,
            chapter_page: ci(r"/.*/.*-\w{3,4}-c\d+\.html$")?,
            chapter_label: ci(r"(Vol\s(\d+)\s)?Chapter\s([0-9]+(\.)?([0-9]+)?)(:\s(.*))?")?,
            chapter_word: ci(r"chapter|chap|chaps")?,
            selectors: Selectors::new()?,
        })
    }

    fn host(&self) -> &str {
        self.runtime.descriptor().host()
    }

    async fn fetch_page(&self, url: String, ready: &str) -> Result<Document, SourceError> {
        Ok(self
            .runtime
            .fetch_html(FetchRequest::html(url).wait_for(ready))
            .await?)
    }

    fn parse_search(&self, document: &Document) -> Vec<ScrapedEntry> {
        let html = document.parse();
        let s = &self.selectors;

        html.select(&s.search_item)
            .filter_map(|item| {
                Some(ScrapedEntry {
                    name: first_text(item, &s.search_name)?,
                    url: first_attr(item, &s.search_link, "href")?,
                    cover: first_attr(item, &s.cover, "src"),
                    last_release: first_text(item, &s.search_release),
                    lang: None,
                })
            })
            .collect()
    }

    fn parse_recommend(&self, document: &Document) -> Vec<ScrapedEntry> {
        let html = document.parse();
        let s = &self.selectors;

        html.select(&s.rank_item)
            .filter_map(|item| {
                Some(ScrapedEntry {
                    name: first_text(item, &s.rank_name)?,
                    url: first_attr(item, &s.rank_link, "href")?,
                    cover: first_attr(item, &s.cover, "src"),
                    last_release: None,
                    lang: None,
                })
            })
            .collect()
    }

    fn parse_manga(&self, document: &Document) -> Result<ScrapedManga, SourceError> {
        let html = document.parse();
        let s = &self.selectors;
        let root = html.root_element();

        let name = first_text(root, &s.title)
            .ok_or_else(|| SourceError::Parse(format!("no title in {}", document.url)))?;

        let synopsis = html
            .select(&s.info_block)
            .find(|block| text_of(*block).contains("Summary"))
            .map(|block| {
                block
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|child| child.value().name() == "div")
                    .map(text_of)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let chapters = html
            .select(&s.chapter_row)
            .filter_map(|row| {
                let url = row.value().attr("href")?.trim().to_string();
                let label = text_of(row);
                let info = self.chapter_info(&label);
                let name = info
                    .as_ref()
                    .and_then(|i| i.name.clone())
                    .unwrap_or_else(|| self.chapter_word.replace_all(&label, "").trim().to_string());
                Some(ScrapedChapter {
                    name,
                    volume: info.and_then(|i| i.volume),
                    url,
                })
            })
            .collect();

        Ok(ScrapedManga {
            name,
            synopsis,
            cover: first_attr(root, &s.info_cover, "src"),
            authors: labelled_links(&html, &s.detail_row, &s.link, "Author(s)"),
            tags: labelled_links(&html, &s.genre_row, &s.link, "Genre(s)"),
            chapters,
        })
    }

    fn parse_chapter(&self, document: &Document) -> Vec<Option<String>> {
        let html = document.parse();
        html.select(&self.selectors.chapter_image)
            .map(|img| {
                img.value()
                    .attr("src")
                    .map(|src| src.trim().to_string())
                    .filter(|src| !src.is_empty())
            })
            .collect()
    }

    fn parse_backlink(&self, document: &Document) -> Option<String> {
        let html = document.parse();
        first_attr(html.root_element(), &self.selectors.manga_backlink, "href")
    }
}

#[async_trait]
impl Source for MangaHasu {
    fn runtime(&self) -> &SourceRuntime {
        &self.runtime
    }

    fn is_manga_page(&self, url: &str) -> bool {
        let res = self.manga_page.is_match(url);
        if !res {
            tracing::debug!(source = "mangahasu", "not a manga page: {}", url);
        }
        res
    }

    fn is_chapter_page(&self, url: &str) -> bool {
        let res = self.chapter_page.is_match(url);
        if !res {
            tracing::debug!(source = "mangahasu", "not a chapter page: {}", url);
        }
        res
    }

    fn chapter_info(&self, label: &str) -> Option<ChapterInfo> {
        let Some(caps) = self.chapter_label.captures(label) else {
            tracing::debug!(source = "mangahasu", "not a chapter label: {}", label);
            return None;
        };

        Some(ChapterInfo {
            volume: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            chapter: caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0.0),
            name: caps
                .get(7)
                .map(|m| m.as_str().trim().to_string())
                .filter(|n| !n.is_empty()),
        })
    }

    async fn search_entries(&self, query: &str) -> Result<Vec<ScrapedEntry>, SourceError> {
        let url = format!(
            "{}/advanced-search.html?keyword={}",
            self.host(),
            urlencoding::encode(query)
        );
        let document = self.fetch_page(url, ".tag.search-results-a").await?;
        Ok(self.parse_search(&document))
    }

    async fn recommend_entries(&self) -> Result<Vec<ScrapedEntry>, SourceError> {
        let url = format!("{}/popular-dw.html", self.host());
        let document = self.fetch_page(url, ".r_content").await?;
        Ok(self.parse_recommend(&document))
    }

    async fn manga_page(&self, url: &str, _lang: &str) -> Result<ScrapedManga, SourceError> {
        let document = self
            .fetch_page(format!("{}{}", self.host(), url), "td.name > a")
            .await?;
        self.parse_manga(&document)
    }

    async fn chapter_images(&self, url: &str, _lang: &str) -> Result<ChapterImages, SourceError> {
        let page_url = format!("{}{}", self.host(), url);
        let document = self.fetch_page(page_url.clone(), ".img-chapter").await?;
        Ok(ChapterImages {
            referer: Some(page_url),
            pages: self.parse_chapter(&document),
        })
    }

    async fn manga_link_from_chapter(
        &self,
        url: &str,
        _lang: &str,
    ) -> Result<Option<String>, SourceError> {
        let document = self
            .fetch_page(format!("{}{}", self.host(), url), "body")
            .await?;
        Ok(self.parse_backlink(&document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MangaHasu {
        MangaHasu::new(&SourceServices::offline()).unwrap()
    }

    #[test]
    fn test_descriptor() {
        let source = source();
        let descriptor = source.descriptor();
        assert_eq!(descriptor.name(), "mangahasu");
        assert_eq!(descriptor.host(), "https://mangahasu.se");
        assert_eq!(descriptor.wait_time(), Duration::from_millis(500));
        assert_eq!(descriptor.langs(), ["en".to_string()]);
        assert!(descriptor.capabilities().contains(SourceCapabilities::CHAPTER_INFO));
        assert_eq!(descriptor.meta().speed, 0.5);
    }

    #[test]
    fn test_classifiers_are_exclusive() {
        let source = source();
        let manga = "/one-piece-xyz-p1234.html";
        let chapter = "/one-piece-xyz-p1234/one-piece-chap-c5678.html";

        assert!(source.is_manga_page(manga));
        assert!(!source.is_chapter_page(manga));
        assert!(source.is_chapter_page(chapter));
        assert!(!source.is_manga_page(chapter));

        assert!(source.is_manga_page("/ONE-PIECE-XYZ-P1234.HTML"));
        assert!(!source.is_manga_page("/popular-dw.html"));
        assert!(!source.is_chapter_page("/popular-dw.html"));
        assert!(!source.is_manga_page("one-piece-xyz-p1234.html"));
    }

    #[test]
    fn test_chapter_info() {
        let source = source();

        let info = source.chapter_info("Chapter 12: Homecoming").unwrap();
        assert_eq!(info.volume, None);
        assert_eq!(info.chapter, 12.0);
        assert_eq!(info.name.as_deref(), Some("Homecoming"));

        let info = source.chapter_info("Vol 2 Chapter 5").unwrap();
        assert_eq!(info.volume, Some(2));
        assert_eq!(info.chapter, 5.0);
        assert_eq!(info.name, None);

        let info = source.chapter_info("chapter 10.5").unwrap();
        assert_eq!(info.chapter, 10.5);

        assert!(source.chapter_info("Oneshot").is_none());
    }

    #[test]
    fn test_parse_search_skips_incomplete_items() {
        let source = source();
        let doc = Document::new(
            "u",
            r#"<div class="tag search-results-a"></div>
            <div class="div_item">
              <div class="wrapper_imgage"><img src="//cdn.test/a.jpg"></div>
              <a class="name-manga" href="https://mangahasu.se/a-title-abc-p1.html"><h3> A Title </h3></a>
              <a class="name-chapter"><span>Chapter 3</span></a>
            </div>
            <div class="div_item"><a class="name-manga"><h3>No link</h3></a></div>"#,
        );

        let entries = source.parse_search(&doc);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "A Title");
        assert_eq!(entries[0].cover.as_deref(), Some("//cdn.test/a.jpg"));
        assert_eq!(entries[0].last_release.as_deref(), Some("Chapter 3"));
    }

    #[test]
    fn test_parse_manga() {
        let source = source();
        let doc = Document::new(
            "u",
            r#"<div class="info-img"><img src="/cover.jpg"></div>
            <div class="info-title"><h1>Title</h1></div>
            <div class="content-info"><h3>Summary</h3><div>A story.</div></div>
            <div class="info-c">
              <div class="detail_item"><div class="row"><b>Author(s)</b> <a>ODA Eiichiro</a></div></div>
              <div class="detail_item row-a"><b>Genre(s)</b> <a>Action</a><a>Comedy</a></div>
            </div>
            <table>
              <tr><td class="name"><a href="/t/t-chap-c2.html">Vol 1 Chapter 2: Second</a></td></tr>
              <tr><td class="name"><a href="/t/t-chap-c1.html">Chapter 1</a></td></tr>
            </table>"#,
        );

        let manga = source.parse_manga(&doc).unwrap();
        assert_eq!(manga.name, "Title");
        assert_eq!(manga.synopsis, "A story.");
        assert_eq!(manga.cover.as_deref(), Some("/cover.jpg"));
        assert_eq!(manga.authors, vec!["oda eiichiro"]);
        assert_eq!(manga.tags, vec!["action", "comedy"]);
        assert_eq!(manga.chapters.len(), 2);
        assert_eq!(manga.chapters[0].name, "Second");
        assert_eq!(manga.chapters[0].volume, Some(1));
        assert_eq!(manga.chapters[1].name, "1");
    }

    #[test]
    fn test_parse_manga_without_title_is_parse_error() {
        let source = source();
        let doc = Document::new("u", "<td class='name'><a href='/x'>x</a></td>");
        assert!(matches!(source.parse_manga(&doc), Err(SourceError::Parse(_))));
    }
}
