use axum::response::Html;

use crate::settings::Settings;

pub fn get_map_html(settings: &Settings) -> Html<String> {
    let html = MAP_HTML
        .replace("{{QUERY_RADIUS_KM}}", &settings.query_radius_km.to_string())
        .replace("{{VERSION}}", env!("CARGO_PKG_VERSION"));
    Html(html)
}

// HTML template for the map page
const MAP_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>PokeFinder v{{VERSION}}</title>
    <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
    <style>
        body { margin: 0; padding: 0; font-family: Arial, sans-serif; }
        #map { height: 100vh; width: 100%; }
        .info {
            padding: 6px 8px;
            font: 14px/16px Arial, Helvetica, sans-serif;
            background: rgba(255,255,255,0.9);
            box-shadow: 0 0 15px rgba(0,0,0,0.2);
            border-radius: 5px;
        }
        #spawn {
            position: absolute; bottom: 24px; left: 50%; transform: translateX(-50%);
            z-index: 1000; padding: 12px 20px; font-size: 16px; border: none;
            border-radius: 24px; background: #e3350d; color: white; cursor: pointer;
            box-shadow: 0 2px 8px rgba(0,0,0,0.3);
        }
        .creature-icon { font-weight: bold; text-align: center; line-height: 32px;
            background: #ffcb05; border: 2px solid #3d7dca; border-radius: 50%; }
        .user-icon { background: #3d7dca; border: 3px solid white; border-radius: 50%; }
        .route-btn { width: 30px; height: 30px; border: none; cursor: pointer; }
    </style>
</head>
<body>
    <div id="map"></div>
    <button id="spawn">Spot random Pokemon</button>
    <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
    <script>
        const map = L.map('map', { worldCopyJump: true }).setView([0, 0], 2);
        L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
            maxZoom: 19,
            attribution: '&copy; OpenStreetMap contributors'
        }).addTo(map);

        const info = L.control({ position: 'topright' });
        info.onAdd = function () {
            this._div = L.DomUtil.create('div', 'info');
            this._div.innerHTML = 'Sightings within {{QUERY_RADIUS_KM}} km';
            return this._div;
        };
        info.addTo(map);

        let userMarker = null;
        let showsUserLocation = false;
        let watchId = null;

        function post(path, body) {
            return fetch(path, {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: body === undefined ? undefined : JSON.stringify(body)
            });
        }

        function boundsFor(region) {
            const c = region.center, s = region.span;
            return [[c.lat - s.lat_delta / 2, c.lng - s.lng_delta / 2],
                    [c.lat + s.lat_delta / 2, c.lng + s.lng_delta / 2]];
        }

        function iconFor(view) {
            if (view.reuse_id === 'User') {
                return L.divIcon({ className: 'user-icon', iconSize: [16, 16] });
            }
            return L.divIcon({ className: 'creature-icon', html: '#' + view.icon, iconSize: [36, 36] });
        }

        // Markers arrive both from the initial list and from the event stream
        const drawn = new Set();
        function addAnnotation(index, annotation, view) {
            if (drawn.has(index)) return;
            drawn.add(index);
            const at = [annotation.coordinate.lat, annotation.coordinate.lng];
            const marker = L.marker(at, { icon: iconFor(view) }).addTo(map);
            if (view.can_show_callout) {
                const popup = document.createElement('div');
                popup.innerHTML = '<b>' + view.title + '</b> #' + view.icon + ' ';
                if (view.action) {
                    const btn = document.createElement('button');
                    btn.className = 'route-btn';
                    btn.title = 'Directions';
                    btn.textContent = '\u{1F5FA}';
                    btn.onclick = () => post('/api/annotations/' + index + '/action');
                    popup.appendChild(btn);
                }
                marker.bindPopup(popup);
            }
        }

        function startWatching() {
            if (watchId !== null || !navigator.geolocation) return;
            watchId = navigator.geolocation.watchPosition(
                (pos) => post('/api/location', { lat: pos.coords.latitude, lng: pos.coords.longitude }),
                (err) => {
                    if (err.code === err.PERMISSION_DENIED) {
                        post('/api/authorization', { status: 'denied' });
                    }
                }
            );
        }

        function requestPermission() {
            if (!navigator.geolocation) {
                post('/api/authorization', { status: 'restricted' });
                return;
            }
            navigator.geolocation.getCurrentPosition(
                () => post('/api/authorization', { status: 'authorized_when_in_use' }),
                (err) => post('/api/authorization', {
                    status: err.code === err.PERMISSION_DENIED ? 'denied' : 'not_determined'
                })
            );
        }

        function updateUserMarker(location) {
            if (!showsUserLocation) return;
            const at = [location.lat, location.lng];
            if (userMarker) {
                userMarker.setLatLng(at);
            } else {
                userMarker = L.marker(at, { icon: iconFor({ reuse_id: 'User' }) }).addTo(map);
            }
        }

        const events = new EventSource('/api/events');
        events.onmessage = (msg) => {
            const event = JSON.parse(msg.data);
            const data = event.data || {};
            switch (event.event_type) {
                case 'request_location_permission':
                    requestPermission();
                    break;
                case 'user_location_visibility':
                    showsUserLocation = data.visible;
                    if (showsUserLocation) startWatching();
                    break;
                case 'user_location_updated':
                    updateUserMarker(data.location);
                    break;
                case 'region_changed':
                    if (data.animated) {
                        map.flyToBounds(boundsFor(data.region));
                    }
                    break;
                case 'annotation_added':
                    addAnnotation(data.index, data.annotation, data.view);
                    break;
                case 'open_route':
                    window.open(data.url, '_blank');
                    break;
            }
        };
        let appeared = false;
        events.onopen = () => {
            if (appeared) return;
            appeared = true;
            post('/api/appear');
        };

        map.on('moveend', () => {
            const c = map.getCenter().wrap();
            const b = map.getBounds();
            const span = { lat_delta: b.getNorth() - b.getSouth(), lng_delta: Math.min(b.getEast() - b.getWest(), 360) };
            post('/api/region', { center: { lat: c.lat, lng: c.lng }, span });
        });

        document.getElementById('spawn').onclick = () => post('/api/spawn');

        fetch('/api/annotations').then(r => r.json()).then(list => {
            for (const item of list) {
                if (item.index !== null) addAnnotation(item.index, item.annotation, item.view);
            }
        });
    </script>
</body>
</html>
"#;
