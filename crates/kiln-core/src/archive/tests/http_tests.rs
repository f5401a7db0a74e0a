use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue};

use crate::archive::http::advertised_length;
use crate::archive::{HttpClient, ReqwestClient};

/// Answer one request with `head` and no body, then close
fn serve_once(head: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
            line.clear();
        }
        stream.write_all(head.as_bytes()).unwrap();
    });
    format!("http://{}/therock-dist-linux-gfx1151-7.0.0.tar.gz", addr)
}

#[test]
fn test_advertised_length_reads_the_header() {
    let mut headers = HeaderMap::new();
    assert_eq!(advertised_length(&headers), None);

    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1000"));
    assert_eq!(advertised_length(&headers), Some(1000));

    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    assert_eq!(advertised_length(&headers), None);

    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
    assert_eq!(advertised_length(&headers), None);
}

#[tokio::test]
async fn test_head_reports_content_length_of_the_body() {
    let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n");
    let client = ReqwestClient::new(Duration::from_secs(10)).unwrap();

    assert_eq!(client.probe(&url).await.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_head_error_status_is_reported() {
    let url = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    let client = ReqwestClient::new(Duration::from_secs(10)).unwrap();

    let err = client.probe(&url).await.unwrap_err();
    assert!(err.to_string().contains("404"), "{}", err);
}
