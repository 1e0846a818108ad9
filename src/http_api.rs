use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;

use crate::http_util::{request_host, HttpQuery};
use crate::index::{
    Branch, Index, NodeEntry, Track, ALBUMS_NODE, ARTISTS_NODE, GENRES_NODE, ROOT_NODE,
};
use crate::navigation::{Navigator, Page, Window, ALL_TRACKS_NAME};
use crate::protocol::{self, NavRequest};
use crate::query::{self, Collection, TrackSource};
use crate::Streamium;

#[derive(Debug)]
pub enum Error {
    HyperError(hyper::Error),
    DatabaseError(rusqlite::Error),
    HttpError(hyper::http::Error),
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Error {
        Error::HyperError(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::DatabaseError(err)
    }
}

impl From<hyper::http::Error> for Error {
    fn from(err: hyper::http::Error) -> Error {
        Error::HttpError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::HyperError(e) => write!(f, "{}", e),
            Error::DatabaseError(e) => write!(f, "{}", e),
            Error::HttpError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

/// Connection details the handlers need besides the request itself.
#[derive(Debug, Clone, Copy)]
struct Peer {
    remote: IpAddr,
    local: SocketAddr,
}

/// Devices are keyed by IPv4 address even when the listener is dual stack.
fn client_key(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

pub async fn run_api(streamium: Arc<Streamium>, bind: SocketAddr) -> Result<(), Error> {
    let make_service = make_service_fn(move |socket: &AddrStream| {
        let streamium = streamium.clone();
        let peer = Peer {
            remote: client_key(socket.remote_addr().ip()),
            local: socket.local_addr(),
        };

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                process_request(req, streamium.clone(), peer)
            }))
        }
    });

    let server = Server::try_bind(&bind)?.serve(make_service);

    info!("listening on {}", bind);

    server.await?;

    Ok(())
}

async fn process_request(
    req: Request<Body>,
    streamium: Arc<Streamium>,
    peer: Peer,
) -> Result<Response<Body>, hyper::Error> {
    debug!("{} {} from {}", req.method(), req.uri(), peer.remote);

    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/") | (&Method::POST, "//") => api_navigate(req, &streamium, peer).await,
        (&Method::GET, "/ping") => Ok(Response::new(Body::from("pong"))),
        (&Method::GET, "/node") => api_node(&req, &streamium),
        _ => plain(StatusCode::NOT_FOUND, "404"),
    };

    match result {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("{}", e);

            let mut response = Response::new(Body::from(format!("Error: {}", e)));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok(response)
        }
    }
}

fn plain(status: StatusCode, body: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Body::from(body.to_string()))?)
}

async fn api_navigate(
    req: Request<Body>,
    streamium: &Streamium,
    peer: Peer,
) -> Result<Response<Body>, Error> {
    let host = request_host(&req).unwrap_or_else(|| peer.local.ip().to_string());
    let base_url = format!("http://{}:{}/", host, streamium.web_port);

    let body = hyper::body::to_bytes(req.into_body()).await?;
    let body = String::from_utf8_lossy(&body);

    trace!("request body: {}", body);

    let request = match NavRequest::parse(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("bad navigation request from {}: {}", peer.remote, e);
            return plain(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    debug!(
        "client {}: nodeid {:?} for {} elements from {}, superscroll {:?}",
        peer.remote, request.node_id, request.num_elem, request.from_index, request.superscroll
    );

    let index = streamium.index_source.get()?;

    match navigate(&streamium, &index, &request, peer.remote, &base_url)? {
        Some(xml) => {
            trace!("response: {}", xml);

            Ok(Response::builder()
                .header("Content-Type", "text/xml; charset=utf-8")
                .body(Body::from(xml))?)
        }
        None => {
            error!("unknown nodeid {:?} from {}", request.node_id, peer.remote);
            plain(StatusCode::NOT_FOUND, "Unknown nodeid")
        }
    }
}

/// Answers a navigation request; `None` for an unknown node.
fn navigate(
    streamium: &Streamium,
    index: &Index,
    request: &NavRequest,
    client: IpAddr,
    base_url: &str,
) -> rusqlite::Result<Option<String>> {
    let navigator = &streamium.navigator;
    let root = streamium.music_root.as_path();

    let window = Window {
        client,
        from: request.from_index,
        count: request.num_elem,
        superscroll: request.superscroll.as_deref(),
    };

    let list = |page: Page<Branch>| {
        debug!("sending {} of {} entries", page.items.len(), page.total);
        protocol::render_list(&page.items, window.from, page.total, true)
    };

    let tracks = |page: Page<Track>| {
        debug!("sending {} of {} tracks", page.items.len(), page.total);
        protocol::render_tracks(&page.items, window.from, page.total, base_url, root)
    };

    let node_id = match request.node_id {
        None => {
            let top = Navigator::top_level();
            return Ok(Some(protocol::render_list(&top, 0, top.len(), false)));
        }
        Some(id) => id,
    };

    let xml = match node_id {
        ARTISTS_NODE => list(navigator.list_artists(index, &window)?),
        ALBUMS_NODE => list(navigator.list_albums(index, &window)?),
        GENRES_NODE => list(navigator.list_genres(index, &window)?),
        _ => match navigator.resolve_node(index, node_id)? {
            Some(NodeEntry::Artist(artist)) => {
                list(navigator.albums_for_artist(index, &artist, &window)?)
            }
            Some(NodeEntry::AllTracks(all_tracks)) => {
                tracks(navigator.all_tracks_for_artist(index, &all_tracks, &window)?)
            }
            Some(NodeEntry::Album(album)) => {
                tracks(navigator.tracks_for_album(index, &album, &window)?)
            }
            Some(NodeEntry::Genre(genre)) => {
                tracks(navigator.tracks_for_genre(index, &genre, &window)?)
            }
            Some(NodeEntry::Track(track)) => {
                debug!("sending track '{}'", track.name);
                protocol::render_tracks(&[track], window.from, 1, base_url, root)
            }
            None => return Ok(None),
        },
    };

    Ok(Some(xml))
}

fn api_node(req: &Request<Body>, streamium: &Streamium) -> Result<Response<Body>, Error> {
    let query = HttpQuery::from(req.uri().query());

    let node_id = match query.get_i64("nodeid") {
        Some(id) => id,
        None => return plain(StatusCode::BAD_REQUEST, "nodeid required"),
    };

    let index = streamium.index_source.get()?;

    let listing = match node_listing(&streamium.navigator, &index, node_id)? {
        Some(l) => l,
        None => return plain(StatusCode::NOT_FOUND, "Unknown nodeid"),
    };

    Ok(Response::builder()
        .header("Content-Type", "application/json")
        .body(Body::from(listing.to_string()))?)
}

/// Every child of `node_id` as JSON, unpaginated and unfiltered.
fn node_listing(
    navigator: &Navigator,
    index: &Index,
    node_id: i64,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let branches = |node_type: &str, items: Vec<Branch>| {
        json!({
            "nodeid": node_id,
            "type": node_type,
            "total": items.len(),
            "items": items,
        })
    };

    let tracks = |node_type: &str, items: Vec<Track>| {
        json!({
            "nodeid": node_id,
            "type": node_type,
            "total": items.len(),
            "items": items,
        })
    };

    let collection = |collection: Collection| -> rusqlite::Result<Vec<Branch>> {
        Ok(query::query_branches(index, collection, None, None)?.1)
    };

    let value = match node_id {
        ROOT_NODE => branches("Root", Navigator::top_level()),
        ARTISTS_NODE => branches("Artists", collection(Collection::Artists)?),
        ALBUMS_NODE => branches("Albums", collection(Collection::Albums)?),
        GENRES_NODE => branches("Genres", collection(Collection::Genres)?),
        _ => {
            let entry = match navigator.resolve_node(index, node_id)? {
                Some(e) => e,
                None => return Ok(None),
            };
            let node_type = format!("{:?}", entry.node_type());

            match entry {
                NodeEntry::Artist(artist) => {
                    let mut items = Vec::new();
                    if let Some(all_tracks) = index.all_tracks(artist.all_tracks_id)? {
                        items.push(Branch {
                            name: ALL_TRACKS_NAME.to_string(),
                            node_id: all_tracks.node_id,
                        });
                    }
                    items.extend(query::query_artist_albums(index, artist.artist_id)?);
                    branches(&node_type, items)
                }
                NodeEntry::AllTracks(all_tracks) => {
                    let source = TrackSource::AllTracks(all_tracks.all_tracks_id);
                    tracks(&node_type, query::query_tracks(index, source, None, None)?.1)
                }
                NodeEntry::Album(album) => {
                    let source = TrackSource::Album(album.album_id);
                    tracks(&node_type, query::query_tracks(index, source, None, None)?.1)
                }
                NodeEntry::Genre(genre) => {
                    let source = TrackSource::Genre(genre.genre_id);
                    tracks(&node_type, query::query_tracks(index, source, None, None)?.1)
                }
                NodeEntry::Track(track) => tracks(&node_type, vec![track]),
            }
        }
    };

    Ok(Some(value))
}
