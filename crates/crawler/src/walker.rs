use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use browser::{ElementRef, Launcher, PageQuery, WaitMode};
use indexmap::IndexSet;
use resilience::{RetryContext, RetryPolicy};
use session::BrowserSession;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::WalkerConfig;
use crate::error::{is_missing_video_source, is_navigation_failure, is_page_failure, WalkError};
use crate::layout::{ColumnLayout, SectionKind};
use crate::model::{EpisodeRecord, SeriesRecord, TitleRecord};
use crate::TitleSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedUnit {
    pub name: String,
    pub reason: String,
}

impl SkippedUnit {
    fn new(name: impl Into<String>, error: &WalkError) -> Self {
        Self {
            name: name.into(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub titles_emitted: usize,
    pub titles_skipped: Vec<SkippedUnit>,
    pub series_skipped: Vec<SkippedUnit>,
    /// Player pages whose source was never found and fell back to nothing.
    pub players_degraded: usize,
    /// Player listings or pages abandoned after a navigation or page failure.
    pub players_failed: usize,
    /// Title URL the walk would have continued with when a shutdown was
    /// requested. Usable as a resume marker.
    pub interrupted_at: Option<String>,
}

struct MenuEntry {
    path: String,
    name: String,
}

type SeriesOutcome = Result<SeriesRecord, (String, WalkError)>;

/// Walks the catalog root, every title, its series, their episodes and
/// finally each player page, through one browser session.
pub struct CatalogWalker {
    config: WalkerConfig,
    navigation: RetryPolicy<WalkError>,
    element_wait: RetryPolicy<WalkError>,
    extraction: RetryPolicy<WalkError>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl CatalogWalker {
    pub fn new(config: WalkerConfig) -> Self {
        let resilience = config.resilience.clone();
        Self {
            navigation: RetryPolicy::new("navigation", resilience.navigation, is_navigation_failure),
            element_wait: RetryPolicy::new("element-wait", resilience.element_wait, is_page_failure),
            extraction: RetryPolicy::new("extraction", resilience.extraction, is_missing_video_source),
            config,
            shutdown: None,
        }
    }

    /// Stops the walk before the next title once `flag` is set.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    fn stop_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Walks the whole catalog, handing every finished title to `sink`.
    ///
    /// A broken title or series is logged, recorded in the summary and
    /// skipped. Only a session that cannot be started again or a failing
    /// sink ends the walk early. The session is disposed either way.
    pub async fn walk<L, K>(
        &self,
        session: &mut BrowserSession<L>,
        sink: &mut K,
    ) -> Result<WalkSummary, WalkError>
    where
        L: Launcher,
        K: TitleSink + ?Sized,
    {
        let mut summary = WalkSummary::default();
        let result = self.walk_catalog(session, sink, &mut summary).await;
        session.dispose();

        match result {
            Ok(()) => {
                info!(
                    "Catalog walk finished: {} titles emitted, {} titles skipped, {} series skipped",
                    summary.titles_emitted,
                    summary.titles_skipped.len(),
                    summary.series_skipped.len()
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Catalog walk aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn walk_catalog<L, K>(
        &self,
        session: &mut BrowserSession<L>,
        sink: &mut K,
        summary: &mut WalkSummary,
    ) -> Result<(), WalkError>
    where
        L: Launcher,
        K: TitleSink + ?Sized,
    {
        if !session.is_live() {
            session.acquire()?;
        }

        let title_urls = self.discover_titles(session).await?;
        info!("{} animes found", title_urls.len());

        let title_urls = match self.config.resume_marker.as_deref() {
            Some(marker) => resume_from(title_urls, marker),
            None => title_urls,
        };

        for url in &title_urls {
            if self.stop_requested() {
                warn!("Shutdown requested, stopping before anime {}", url);
                summary.interrupted_at = Some(url.clone());
                break;
            }
            if let Err(e) = self.walk_title_url(session, url, sink, summary).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!("Skipping anime {}: {}", url, e);
                summary.titles_skipped.push(SkippedUnit::new(url.as_str(), &e));
            }
            if summary.interrupted_at.is_some() {
                break;
            }
        }

        Ok(())
    }

    async fn discover_titles<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
    ) -> Result<Vec<String>, WalkError> {
        let root = self.config.root_url.as_str();
        let context = RetryContext::new().with("url", root);

        let hrefs = self
            .load_and_read(session, root, WaitMode::DomReady, &context, |page| {
                let footer = page
                    .query(None, &self.config.catalog_footer_selector)?
                    .ok_or_else(|| WalkError::CatalogNotFound {
                        url: root.to_string(),
                    })?;

                let mut hrefs = Vec::new();
                for anchor in page.query_all(Some(footer), "a")? {
                    if let Some(href) = page.attribute(anchor, "href")? {
                        hrefs.push(href);
                    }
                }
                Ok(hrefs)
            })
            .await?;

        let mut urls = IndexSet::new();
        for href in hrefs {
            urls.insert(resolve(root, &href)?);
        }
        Ok(urls.into_iter().collect())
    }

    async fn walk_title_url<L, K>(
        &self,
        session: &mut BrowserSession<L>,
        url: &str,
        sink: &mut K,
        summary: &mut WalkSummary,
    ) -> Result<(), WalkError>
    where
        L: Launcher,
        K: TitleSink + ?Sized,
    {
        let kind = SectionKind::classify(url, &self.config.aggregated_host_marker);
        match kind {
            SectionKind::Ordinary => {
                let title = self.resolve_ordinary_title(session, url).await?;
                self.walk_title(session, title, kind, sink, summary).await
            }
            SectionKind::Aggregated => {
                for title in self.resolve_aggregated_titles(session, url).await? {
                    if self.stop_requested() {
                        warn!("Shutdown requested, stopping inside aggregated section {}", url);
                        summary.interrupted_at = Some(url.to_string());
                        break;
                    }
                    self.walk_title(session, title, kind, sink, summary).await?;
                }
                Ok(())
            }
        }
    }

    async fn resolve_ordinary_title<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
        url: &str,
    ) -> Result<TitleRecord, WalkError> {
        let context = RetryContext::new().with("url", url);
        let link = self
            .load_and_read(session, url, WaitMode::DomReady, &context, |page| {
                let href = match page.query(None, &self.config.subpage_link_selector)? {
                    Some(anchor) => page.attribute(anchor, "href")?,
                    None => None,
                };
                href.filter(|href| !href.trim().is_empty())
                    .ok_or_else(|| WalkError::SubpageLinkNotFound {
                        url: url.to_string(),
                    })
            })
            .await?;
        let subdomain = resolve(url, &link)?;

        let context = RetryContext::new().with("url", subdomain.as_str());
        let (name, entries) = self
            .load_and_read(session, &subdomain, WaitMode::DomReady, &context, |page| {
                let name = title_name(&page.title()?, &self.config.title_suffix)?;
                let entries =
                    read_submenu(page, &self.config, &self.config.series_menu_label, &subdomain)?;
                Ok((name, entries))
            })
            .await?;

        if entries.is_empty() {
            warn!("Didn't find any anime series for the following anime: {}", name);
        } else {
            let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
            info!(
                "For anime: {}, found following anime series: {}",
                name,
                names.join(", ")
            );
        }

        Ok(TitleRecord::new(name, subdomain.as_str())
            .with_series_paths(entries.into_iter().map(|entry| entry.path)))
    }

    async fn resolve_aggregated_titles<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
        url: &str,
    ) -> Result<Vec<TitleRecord>, WalkError> {
        let context = RetryContext::new().with("url", url);
        let entries = self
            .load_and_read(session, url, WaitMode::DomReady, &context, |page| {
                let mut entries = Vec::new();
                for label in &self.config.aggregated_menu_labels {
                    entries.extend(read_submenu(page, &self.config, label, url)?);
                }
                Ok(entries)
            })
            .await?;

        info!("Found {} animes in aggregated section {}", entries.len(), url);
        Ok(entries
            .into_iter()
            .map(|entry| TitleRecord::new(entry.name, url).with_series_paths([entry.path]))
            .collect())
    }

    async fn walk_title<L, K>(
        &self,
        session: &mut BrowserSession<L>,
        mut title: TitleRecord,
        kind: SectionKind,
        sink: &mut K,
        summary: &mut WalkSummary,
    ) -> Result<(), WalkError>
    where
        L: Launcher,
        K: TitleSink + ?Sized,
    {
        if title.series_paths.is_empty() {
            warn!("Anime {} doesn't list any series pages", title.name);
        }

        let paths: Vec<String> = title.series_paths.iter().cloned().collect();
        for path in &paths {
            match self.discover_episodes(session, &title, path, kind).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            Ok(series) => title.series.push(series),
                            Err((series_name, e)) => {
                                error!(
                                    "Skipping series {} of anime {}: {}",
                                    series_name, title.name, e
                                );
                                summary.series_skipped.push(SkippedUnit::new(
                                    format!("{} / {}", title.name, series_name),
                                    &e,
                                ));
                            }
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Skipping series page {} of anime {}: {}", path, title.name, e);
                    summary
                        .series_skipped
                        .push(SkippedUnit::new(format!("{} / {}", title.name, path), &e));
                }
            }
        }

        {
            let TitleRecord {
                name, url, series, ..
            } = &mut title;
            for series in series.iter_mut() {
                for episode in series.episodes.iter_mut() {
                    let context = RetryContext::new()
                        .with("anime", name.as_str())
                        .with("series", series.name.as_str())
                        .with("episode", episode.name.as_str());
                    self.resolve_episode(session, url, episode, kind, &context, summary)
                        .await?;
                }
            }
        }

        info!(
            "Finished anime: {} ({} series, {} episodes)",
            title.name,
            title.series.len(),
            title.episodes().count()
        );
        sink.on_title_complete(title).map_err(WalkError::Sink)?;
        summary.titles_emitted += 1;
        Ok(())
    }

    async fn discover_episodes<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
        title: &TitleRecord,
        path: &str,
        kind: SectionKind,
    ) -> Result<Vec<SeriesOutcome>, WalkError> {
        let page_url = resolve(&title.url, path)?;
        let context = RetryContext::new()
            .with("anime", title.name.as_str())
            .with("url", page_url.as_str());

        self.load_and_read(session, &page_url, WaitMode::DomReady, &context, |page| {
            let mut headers = Vec::new();
            for selector in &self.config.series_header_selectors {
                headers = page.query_all(None, selector)?;
                if !headers.is_empty() {
                    break;
                }
                debug!("No series headers matching {} on {}", selector, page_url);
            }
            if headers.is_empty() {
                warn!("No series headers found on {}", page_url);
            }

            let mut outcomes = Vec::new();
            for header in headers {
                let series_name = page.inner_text(header)?.trim().to_string();
                match self.read_series(page, header, &series_name, path, &title.url, kind) {
                    Ok(Some(series)) => outcomes.push(Ok(series)),
                    Ok(None) => {}
                    Err(e) if is_page_failure(&e) => return Err(e),
                    Err(e) => outcomes.push(Err((series_name, e))),
                }
            }
            Ok(outcomes)
        })
        .await
    }

    fn read_series<P: PageQuery>(
        &self,
        page: &mut P,
        header: ElementRef,
        series_name: &str,
        path: &str,
        base: &str,
        kind: SectionKind,
    ) -> Result<Option<SeriesRecord>, WalkError> {
        let Some(table) = page.next_sibling(header)? else {
            warn!(
                "Didn't find any sibling element next to a header series: {}",
                series_name
            );
            return Ok(None);
        };

        let rows = page.rows(table)?;
        if rows.is_empty() {
            warn!("No episodes found for series: {}", series_name);
        }
        info!(
            "Found {} episodes for this series: {}",
            rows.len(),
            series_name
        );

        let layout = ColumnLayout::for_series(series_name, &self.config.openings_markers);
        let mut series = SeriesRecord::new(series_name, path);
        for row in rows {
            let cells = page.cells(row)?;
            if cells.len() < 3 {
                return Err(WalkError::MalformedEpisodeRow {
                    series: series_name.to_string(),
                    columns: cells.len(),
                });
            }

            let episode = match kind {
                SectionKind::Ordinary => read_ordinary_episode(page, &cells, layout, base)?,
                SectionKind::Aggregated => self.read_aggregated_episode(page, &cells, base)?,
            };
            series.episodes.push(episode);
        }

        Ok(Some(series))
    }

    fn read_aggregated_episode<P: PageQuery>(
        &self,
        page: &mut P,
        cells: &[ElementRef],
        base: &str,
    ) -> Result<EpisodeRecord, WalkError> {
        let mut episode = EpisodeRecord::new(text(page, cells[0])?);
        for &cell in &cells[1..] {
            if let Some(rel) = player_rel(page, cell)? {
                episode
                    .player_pages
                    .push(resolve(base, &self.config.player_page_path(&rel))?);
            }
        }
        Ok(episode)
    }

    async fn resolve_episode<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
        base: &str,
        episode: &mut EpisodeRecord,
        kind: SectionKind,
        context: &RetryContext,
        summary: &mut WalkSummary,
    ) -> Result<(), WalkError> {
        info!("Scrapping player urls for episode: {}", episode.name);

        if kind == SectionKind::Ordinary {
            let Some(listing) = episode.player_listing.as_deref() else {
                return Ok(());
            };
            match self.resolve_players(session, base, listing, context).await {
                Ok(pages) => episode.player_pages = pages,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Couldn't read players - {} - {}", context, e);
                    summary.players_failed += 1;
                    return Ok(());
                }
            }
        }

        for player in &episode.player_pages {
            let player_context = context.clone().with("url", player.as_str());
            match self.extract_video_source(session, player, &player_context).await {
                Ok(Some(source)) => episode.video_urls.push(source),
                Ok(None) => summary.players_degraded += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Couldn't read player page - {} - {}", player_context, e);
                    summary.players_failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn resolve_players<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
        base: &str,
        listing: &str,
        context: &RetryContext,
    ) -> Result<Vec<String>, WalkError> {
        let listing_context = context.clone().with("url", listing);
        let rels = self
            .load_and_read(session, listing, WaitMode::DomReady, &listing_context, |page| {
                let Some(table) = page.query(None, &self.config.player_table_selector)? else {
                    return Ok(Vec::new());
                };

                let mut rels = Vec::new();
                for row in page.rows(table)? {
                    if page.query(Some(row), "th")?.is_some() {
                        continue;
                    }
                    if let Some(rel) = player_rel(page, row)? {
                        rels.push(rel);
                    }
                }
                Ok(rels)
            })
            .await?;

        if rels.is_empty() {
            warn!("No players found for this episode - {}", context);
        }
        rels.iter()
            .map(|rel| resolve(base, &self.config.player_page_path(rel)))
            .collect()
    }

    async fn extract_video_source<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
        player_url: &str,
        context: &RetryContext,
    ) -> Result<Option<String>, WalkError> {
        let restricted = self
            .load_and_read(session, player_url, WaitMode::NetworkIdle, context, |page| {
                for block in page.query_all(None, &self.config.warning_selector)? {
                    if page.inner_text(block)?.contains(&self.config.warning_text) {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
            .await?;

        if restricted {
            info!("Player is hosted on the restricted external service - {}", context);
            return Ok(Some(self.config.external_host_sentinel.clone()));
        }

        let read_frame = |session: &mut BrowserSession<L>| -> Result<String, WalkError> {
            if session.current_url() != Some(player_url) {
                session.navigate(player_url, WaitMode::NetworkIdle)?;
            }
            let page = session.page()?;
            let missing = || WalkError::VideoSourceNotFound {
                url: player_url.to_string(),
            };
            let frame = page
                .query(None, &self.config.video_frame_selector)?
                .ok_or_else(missing)?;
            page.attribute(frame, "src")?
                .filter(|src| !src.trim().is_empty())
                .ok_or_else(missing)
        };

        match self.extraction.run_or_fallback(session, context, &read_frame).await {
            // The frame read broke the page itself; rebuild the session and
            // read again under the element-wait schedule.
            Err(e) if self.element_wait.triggers_on(&e) => {
                warn!("Frame lookup failed, recovering page - {} - {}", context, e);
                self.element_wait
                    .run(session, context, reacquire::<L>, |session| match read_frame(session) {
                        Ok(source) => Ok(Some(source)),
                        Err(WalkError::VideoSourceNotFound { .. }) => Ok(None),
                        Err(e) => Err(e),
                    })
                    .await
            }
            other => other,
        }
    }

    /// Navigates under the navigation policy.
    async fn load<L: Launcher>(
        &self,
        session: &mut BrowserSession<L>,
        url: &str,
        wait: WaitMode,
        context: &RetryContext,
    ) -> Result<(), WalkError> {
        info!("Navigating to page: {}", url);
        self.navigation
            .run(session, context, reacquire::<L>, |session| {
                session.navigate(url, wait).map_err(WalkError::from)
            })
            .await
    }

    /// Loads `url`, then runs `read` on it under the element-wait policy. A
    /// rebuilt session has no page loaded, so the read navigates back first.
    async fn load_and_read<L, T, F>(
        &self,
        session: &mut BrowserSession<L>,
        url: &str,
        wait: WaitMode,
        context: &RetryContext,
        mut read: F,
    ) -> Result<T, WalkError>
    where
        L: Launcher,
        F: FnMut(&mut L::Page) -> Result<T, WalkError>,
    {
        self.load(session, url, wait, context).await?;
        self.element_wait
            .run(session, context, reacquire::<L>, |session| {
                if session.current_url() != Some(url) {
                    session.navigate(url, wait)?;
                }
                read(session.page()?)
            })
            .await
    }
}

fn reacquire<L: Launcher>(session: &mut BrowserSession<L>) -> Result<(), WalkError> {
    session.teardown_and_reacquire().map_err(WalkError::from)
}

/// Drops every title URL before the first one containing `marker`.
pub fn resume_from(urls: Vec<String>, marker: &str) -> Vec<String> {
    let mut urls = urls;
    match urls.iter().position(|url| url.contains(marker)) {
        Some(start) => {
            info!("Resuming from {} (skipping {} animes)", urls[start], start);
            urls.split_off(start)
        }
        None => {
            warn!("Resume marker '{}' matched no anime url, nothing to walk", marker);
            Vec::new()
        }
    }
}

fn resolve(base: &str, href: &str) -> Result<String, WalkError> {
    let invalid = |reason: String| WalkError::InvalidUrl {
        url: href.to_string(),
        reason,
    };
    let base = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    base.join(href.trim())
        .map(String::from)
        .map_err(|e| invalid(e.to_string()))
}

fn title_name(page_title: &str, suffix: &str) -> Result<String, WalkError> {
    match page_title.find(suffix) {
        Some(end) if !page_title[..end].trim().is_empty() => Ok(page_title[..end].trim().to_string()),
        _ => {
            error!("Couldn't find anime title: {}", page_title);
            Err(WalkError::TitleNameNotFound {
                page_title: page_title.to_string(),
            })
        }
    }
}

fn read_submenu<P: PageQuery>(
    page: &mut P,
    config: &WalkerConfig,
    label: &str,
    url: &str,
) -> Result<Vec<MenuEntry>, WalkError> {
    let menus = page.query_all(None, &config.submenu_selector)?;
    let header = page
        .find_by_text(&menus, label)?
        .ok_or_else(|| WalkError::SeriesMenuNotFound {
            label: label.to_string(),
            url: url.to_string(),
        })?;
    let list = page
        .next_sibling(header)?
        .ok_or_else(|| WalkError::SeriesListNotFound {
            label: label.to_string(),
            url: url.to_string(),
        })?;

    let mut entries = Vec::new();
    for item in page.children(list)? {
        let Some(icon) = page.query(Some(item), "img")? else {
            continue;
        };
        if page.attribute(icon, "src")?.as_deref() != Some(config.series_icon.as_str()) {
            continue;
        }

        let anchor = page.query(Some(item), "a")?;
        let path = match anchor {
            Some(anchor) => page.attribute(anchor, "href")?,
            None => None,
        };
        let (Some(anchor), Some(path)) = (anchor, path.filter(|path| !path.trim().is_empty()))
        else {
            return Err(WalkError::SeriesLinkMissing {
                label: label.to_string(),
                url: url.to_string(),
            });
        };

        entries.push(MenuEntry {
            path,
            name: text(page, anchor)?,
        });
    }
    Ok(entries)
}

fn read_ordinary_episode<P: PageQuery>(
    page: &mut P,
    cells: &[ElementRef],
    layout: ColumnLayout,
    base: &str,
) -> Result<EpisodeRecord, WalkError> {
    let columns = [
        text(page, cells[0])?,
        text(page, cells[1])?,
        text(page, cells[2])?,
    ];
    let mut episode = layout.episode(&columns);

    let href = match page.query(Some(cells[0]), "a")? {
        Some(anchor) => page.attribute(anchor, "href")?,
        None => None,
    };
    match href.filter(|href| !href.trim().is_empty()) {
        Some(href) => episode.player_listing = Some(resolve(base, &href)?),
        None => warn!("Episode {} has no player link", episode.name),
    }
    Ok(episode)
}

fn player_rel<P: PageQuery>(page: &mut P, scope: ElementRef) -> Result<Option<String>, WalkError> {
    let Some(span) = page.query(Some(scope), "span")? else {
        return Ok(None);
    };
    Ok(page
        .attribute(span, "rel")?
        .filter(|rel| !rel.trim().is_empty()))
}

fn text<P: PageQuery>(page: &mut P, element: ElementRef) -> Result<String, WalkError> {
    Ok(page.inner_text(element)?.trim().to_string())
}
